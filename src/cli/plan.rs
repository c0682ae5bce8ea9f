//! `plan` and `vendors` command handlers.

use anyhow::Result;

use bandstack::materializer::credential_key;
use bandstack::planner::descriptor::render_descriptor;

use super::common::{load_catalog, load_config, prepare};
use super::GlobalArgs;

/// Print the deployment descriptor for every stack.
pub(crate) fn cmd_plan(args: &GlobalArgs) -> Result<()> {
    let prepared = prepare(args, false)?;
    print!("{}", render_descriptor(&prepared.plans)?);
    Ok(())
}

/// List catalog vendors with the credential keys each one reads.
pub(crate) fn cmd_vendors(args: &GlobalArgs) -> Result<()> {
    let config = load_config(args)?;
    let catalog = load_catalog(&config)?;
    let enabled = config.enabled_vendors();

    println!("Catalog v{}", catalog.version);
    for vendor in &catalog.vendors {
        println!();
        let marker = if enabled.contains(&vendor.id) {
            " [enabled]"
        } else {
            ""
        };
        println!("{} ({}){}", vendor.id, vendor.name, marker);
        println!("  image:     {}", vendor.image);
        if !vendor.platforms.is_empty() {
            println!("  platforms: {}", vendor.platforms.join(", "));
        }
        if !vendor.description.is_empty() {
            println!("  {}", vendor.description);
        }
        for field in &vendor.fields {
            let mut flags = vec![if field.required { "required" } else { "optional" }];
            if field.secret {
                flags.push("secret");
            }
            let rules: Vec<String> = field.rules.iter().map(|r| r.describe()).collect();
            println!(
                "  {:<32} {}{}",
                credential_key(&vendor.id, &field.name),
                flags.join(", "),
                if rules.is_empty() {
                    String::new()
                } else {
                    format!("; {}", rules.join(", "))
                }
            );
            if !field.description.is_empty() {
                println!("  {:<32} {}", "", field.description);
            }
        }
    }
    Ok(())
}
