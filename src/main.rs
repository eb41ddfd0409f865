use clap::{
    builder::{styling::AnsiColor, Styles},
    Parser,
};
use color_eyre::eyre::WrapErr as _;
use modem_kickd::startup::{Application, Settings};
use tracing::debug;

const SYSLOG_IDENTIFIER: &str = "modem-kickd";

/// Utility args
#[derive(Parser, Debug)]
#[clap(version, about, styles = clap_v3_styles())]
struct Cli {}

fn clap_v3_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Green.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    modem_kickd::telemetry::init(SYSLOG_IDENTIFIER);

    let _args = Cli::parse();

    let settings = Settings::default();
    debug!(?settings, "starting modem-kickd with settings");
    let application = Application::build(settings)
        .await
        .wrap_err("failed to build modem-kickd")?;

    application.run().await?;

    Ok(())
}
