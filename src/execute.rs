use std::path::PathBuf;
use anyhow::{anyhow, Result};
use colored::Colorize;
use toolstall::config::Settings;
use toolstall::pipeline::{InstallRequest, Pipeline};
use toolstall::registry::{Registry, Source};
use toolstall::release::list_releases;
use toolstall::util::sort_tags;
use crate::cli::{ToolstallCommand, CLI};

pub fn execute(cli: CLI) -> Result<()> {
    let settings = Settings::load()?;
    let registry = Registry::builtin()?.with_tools(settings.tools.clone())?;
    let pipeline = Pipeline::new(registry, settings)?;
    match cli.command {
        ToolstallCommand::Install { tool, version, install_dir } => {
            execute_install(&pipeline, tool, version, install_dir)
        }
        ToolstallCommand::List { long } => {
            execute_list(&pipeline, long)
        }
        ToolstallCommand::Search { tool } => {
            execute_search(&pipeline, &tool)
        }
    }
}

pub fn execute_install(
    pipeline: &Pipeline,
    tool: String,
    version: String,
    install_dir: Option<PathBuf>,
) -> Result<()> {
    let request = InstallRequest {
        tool,
        version,
        install_dir,
    };
    let result = pipeline.install(&request)?;
    println!(
        "{} {} {} -> {}",
        "installed".green().bold(),
        result.tool,
        result.version,
        result.installed_path.display()
    );
    println!("  {}", result.reported_version.dimmed());
    for profile in &result.profiles_updated {
        println!("  updated {}", profile.display());
    }
    if !result.profiles_updated.is_empty() {
        println!("  restart your shell or source the profile to pick up PATH changes");
    }
    Ok(())
}

pub fn execute_list(pipeline: &Pipeline, long: bool) -> Result<()> {
    for tool in pipeline.registry().iter() {
        match &tool.description {
            Some(description) => println!("{}: {}", tool.name.bold(), description),
            None => println!("{}", tool.name.bold()),
        }
        if long {
            let origin = match &tool.source {
                Source::Github { repo, .. } => repo.as_str(),
                Source::Url { url, .. } => url.as_str(),
                Source::Script { url, .. } => url.as_str(),
            };
            println!("  {}: {}", tool.source_kind(), origin);
        }
    }
    Ok(())
}

pub fn execute_search(pipeline: &Pipeline, name: &str) -> Result<()> {
    let tool = pipeline.registry().get(name)?;
    let repo = tool
        .github_repo()
        .ok_or_else(|| anyhow!("{name} is not published as GitHub releases; cannot list versions"))?;
    let releases = list_releases(pipeline.fetcher(), repo)?;
    let tags = releases
        .into_iter()
        .filter(|release| !release.prerelease)
        .map(|release| release.tag_name)
        .collect();
    let sorted = sort_tags(tags);
    if sorted.is_empty() {
        println!("No releases found for {name}");
        return Ok(());
    }
    for tag in sorted {
        println!("{name}@{tag}");
    }
    Ok(())
}
