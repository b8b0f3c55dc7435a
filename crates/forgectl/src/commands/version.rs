/// Print version information for the CLI and its library crates
pub fn execute() -> anyhow::Result<()> {
    println!("forgectl {}", env!("CARGO_PKG_VERSION"));
    println!("flowforge-core {}", flowforge_core::VERSION);
    println!("flowforge-runtime {}", flowforge_runtime::VERSION);
    println!("flowforge-llm {}", flowforge_llm::VERSION);
    Ok(())
}
