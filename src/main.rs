use meadow::cli::CliOverrides;

fn main() {
    let cli = match CliOverrides::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    let config_path = cli.config_path().to_string();
    if let Err(err) = meadow::run(&config_path, cli.into_config_overrides()) {
        eprintln!("Application error: {err:?}");
        std::process::exit(1);
    }
}
