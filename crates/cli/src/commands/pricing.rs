//! `stepwise pricing`: list the model pricing table.

use stepwise_providers::pricing_for;

use super::{ConfigArgs, describe};

/// List prices per million tokens: built-ins, registry file and overrides.
pub async fn list(args: ConfigArgs) -> Result<(), Box<dyn std::error::Error>> {
    let home = args.home();
    let (config, source) = args.load(&home)?;
    let table = pricing_for(&config.model)?;
    let models = table.models();

    println!("💰 Model Pricing (per 1M tokens), config: {}", describe(&source));
    println!("─────────────────────────────────────────────────────");
    println!("{:<40} {:>10} {:>10}", "Model", "Input", "Output");
    println!("{:<40} {:>10} {:>10}", "─────", "─────", "──────");

    for name in &models {
        if let Some(p) = table.get(name) {
            println!(
                "{:<40} ${:>8.3} ${:>8.3}",
                name, p.input_per_m, p.output_per_m
            );
        }
    }

    println!();
    println!("  {} models with pricing data", models.len());

    match table.lookup(config.model.model_name()) {
        Some(p) => println!(
            "  Configured model '{}': ${:.3} in / ${:.3} out",
            config.model.model_name(),
            p.input_per_m,
            p.output_per_m
        ),
        None => println!(
            "  ⚠ Configured model '{}' has no pricing; set cost_tracking = \"ignore_errors\" or add [model.pricing]",
            config.model.model_name()
        ),
    }

    Ok(())
}
