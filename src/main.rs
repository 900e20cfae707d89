fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stackpilot=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    stackpilot::cli::run()?;
    Ok(())
}
