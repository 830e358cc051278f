use anyhow::Result;

fn main() -> Result<()> {
    quotabox::cli::run()
}
