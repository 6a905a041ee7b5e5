use std::{
    error::Error,
    fs::File,
    io::{self, Write},
    process::ExitCode,
};

use env_logger::Env;
use tokio_util::sync::CancellationToken;

use rttometer::{
    configuration::{Configuration, Parser, ProberSettings, ReflectorSettings, Role},
    prober::Prober,
    reflector::Reflector,
    shutdown::listen_for_interrupt,
    sink::RecordSink,
};

#[tokio::main]
async fn main() -> ExitCode {
    let conf = Configuration::parse();

    let default_filter = if conf.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    let role = match conf.resolve() {
        Ok(role) => role,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let token = listen_for_interrupt();

    let result = match role {
        Role::Prober(settings) => run_prober(&conf, settings, token).await,
        Role::Reflector(settings) => run_reflector(&conf, settings, token).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_prober(
    conf: &Configuration,
    settings: ProberSettings,
    token: CancellationToken,
) -> Result<(), Box<dyn Error>> {
    let out: Box<dyn Write + Send> = match conf.output {
        Some(ref path) => Box::new(
            File::create(path)
                .map_err(|e| format!("Failed to open file {}: {}", path.display(), e))?,
        ),
        None => Box::new(io::stdout()),
    };

    let prober = Prober::bind(settings, RecordSink::new(out)).await?;
    let report = prober.run(token).await?;

    if conf.stats {
        report.stats.print(conf.format);
    }

    Ok(())
}

async fn run_reflector(
    conf: &Configuration,
    settings: ReflectorSettings,
    token: CancellationToken,
) -> Result<(), Box<dyn Error>> {
    let reflector = Reflector::bind(settings).await?;
    let stats = reflector.run(token).await?;

    if conf.stats {
        stats.print(conf.format);
    }

    Ok(())
}
