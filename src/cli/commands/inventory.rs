//! `inventory` subcommand — inspect an inventory source without running a
//! playbook.

use clap::Parser;

use anyhow::{Context, Result};

use crate::cli::commands::CommandContext;
use crate::inventory::Inventory;

/// Arguments for the `inventory` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct InventoryArgs {
    /// Host-selection pattern to resolve (see the engine's pattern grammar:
    /// comma lists, `:`/`:&`/`:!` colon expressions, or `all`).
    #[arg(default_value = "all")]
    pub pattern: String,

    /// Print the group hierarchy (parent/child relationships and per-group
    /// host counts) instead of a flat host list.
    #[arg(long)]
    pub graph: bool,

    /// Include each host's merged group/host variables in the listing.
    #[arg(long)]
    pub vars: bool,
}

impl InventoryArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let path = ctx
            .inventory_path
            .as_ref()
            .context("an --inventory path is required for the inventory subcommand")?;

        let inventory = Inventory::load(path)
            .map_err(|e| anyhow::anyhow!("failed to load inventory from {}: {e}", path.display()))?;

        if self.graph {
            self.print_graph(ctx, &inventory);
        } else {
            self.print_hosts(ctx, &inventory)?;
        }

        Ok(0)
    }

    fn print_graph(&self, ctx: &CommandContext, inventory: &Inventory) {
        ctx.output.section("INVENTORY GRAPH");

        let mut roots: Vec<&str> = inventory
            .groups()
            .filter(|g| g.parents.is_empty() || g.name == "all")
            .map(|g| g.name.as_str())
            .collect();
        roots.sort_unstable();
        roots.dedup();

        for root in roots {
            self.print_group(ctx, inventory, root, 0);
        }
    }

    fn print_group(&self, ctx: &CommandContext, inventory: &Inventory, name: &str, depth: usize) {
        let Some(group) = inventory.get_group(name) else { return };
        let indent = "  ".repeat(depth);
        ctx.output.plan(&format!("{indent}@{} ({} hosts)", group.name, group.host_count()));

        for host in group.direct_hosts() {
            ctx.output.plan(&format!("{indent}  {host}"));
        }

        let mut children: Vec<&String> = group.child_groups().collect();
        children.sort();
        for child in children {
            self.print_group(ctx, inventory, child, depth + 1);
        }
    }

    fn print_hosts(&self, ctx: &CommandContext, inventory: &Inventory) -> Result<()> {
        let hosts = inventory
            .get_hosts_for_pattern(&self.pattern)
            .map_err(|e| anyhow::anyhow!("invalid host pattern '{}': {e}", self.pattern))?;

        ctx.output.section(&format!("HOSTS matching '{}'", self.pattern));
        let names: Vec<String> = hosts.iter().map(|h| h.name.clone()).collect();
        ctx.output.list(&format!("{} host(s)", names.len()), &names);

        if self.vars {
            for host in &hosts {
                let vars = inventory.get_host_vars(host);
                ctx.output.section(&host.name);
                for (key, value) in &vars {
                    ctx.output.plan(&format!("  {key}: {}", serde_yaml::to_string(value).unwrap_or_default().trim()));
                }
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl super::Runnable for InventoryArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_args_default_pattern() {
        let args = InventoryArgs::try_parse_from(["inventory"]).unwrap();
        assert_eq!(args.pattern, "all");
        assert!(!args.graph);
    }

    #[test]
    fn test_inventory_args_graph_flag() {
        let args = InventoryArgs::try_parse_from(["inventory", "webservers", "--graph"]).unwrap();
        assert_eq!(args.pattern, "webservers");
        assert!(args.graph);
    }
}
