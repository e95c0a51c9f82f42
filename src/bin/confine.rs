use anyhow::Result;

fn main() -> Result<()> {
    confine::cli::run()
}
