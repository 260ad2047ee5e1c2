//! List command.

use anyhow::Result;
use clap::Args;
use tabled::Tabled;

use plfm_vmtest::TestDefinition;

use crate::output::print_table;

use super::CommandContext;

/// List command - show the catalog, restricted to `--platform` if given.
#[derive(Debug, Args)]
pub struct ListCommand {}

#[derive(Debug, Tabled)]
struct TestRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Platforms")]
    platforms: String,
    #[tabled(rename = "Min version")]
    min_version: String,
    #[tabled(rename = "End version")]
    end_version: String,
    #[tabled(rename = "Machines")]
    cluster_size: usize,
}

impl From<&TestDefinition> for TestRow {
    fn from(def: &TestDefinition) -> Self {
        let platforms = if def.platforms.is_empty() {
            "all".to_string()
        } else {
            def.platforms
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(",")
        };
        Self {
            name: def.name.clone(),
            platforms,
            min_version: def.min_version.to_string(),
            end_version: def
                .end_version
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string),
            cluster_size: def.cluster_size,
        }
    }
}

impl ListCommand {
    pub fn run(self, ctx: CommandContext) -> Result<()> {
        let registry = ctx.registry()?;
        let rows: Vec<TestRow> = registry
            .iter()
            .filter(|def| match ctx.platform {
                Some(platform) => def.platforms.is_empty() || def.platforms.contains(&platform),
                None => true,
            })
            .map(TestRow::from)
            .collect();
        print_table(&rows);
        Ok(())
    }
}
