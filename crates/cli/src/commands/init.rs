//! `stepwise init`: create the agent home of a project.

use std::path::Path;

use stepwise_config::AgentHome;

pub async fn run(workdir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let workdir = workdir.canonicalize()?;
    let home = AgentHome::new(&workdir);

    println!("Stepwise agent home");
    println!("===================\n");

    if home.initialize()? {
        println!("✅ Initialized {}", home.root().display());
    } else {
        println!("  Already initialized: {}", home.root().display());
    }

    println!("   Profiles:     {}", home.configs_dir().display());
    println!("   Trajectories: {}", home.data_dir().display());
    println!("   Logs:         {}", home.logs_dir().display());
    println!();
    println!("Put API keys in {} (e.g. OPENAI_API_KEY=sk-...),", home.env_file().display());
    println!("then run: stepwise run --profile live --task \"...\"");

    Ok(())
}
