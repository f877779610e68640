pub fn run() -> anyhow::Result<()> {
    println!("bundleops {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
