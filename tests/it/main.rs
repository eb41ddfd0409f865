use std::time::Duration;

use modem_kickd::startup::{Application, Settings};
use tokio::sync::mpsc;

pub mod helpers;

use helpers::Call;

fn test_settings(bus_address: &str) -> Settings {
    Settings {
        system_dbus_path: Some(bus_address.to_owned()),
        kick_threshold: Duration::from_millis(150),
        sweep_period: Duration::from_millis(200),
        step_delay: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn stuck_modem_receives_the_power_cycle_sequence() -> color_eyre::Result<()> {
    let Some(bus) = helpers::launch_system_dbus().await else {
        eprintln!("dbus-daemon not available; skipping");
        return Ok(());
    };
    let (calls_tx, mut calls_rx) = mpsc::unbounded_channel();
    let _modem_manager = helpers::serve_modem_manager(
        bus.address(),
        calls_tx,
        helpers::REGISTRATION_DENIED,
    )
    .await?;

    let application = Application::build(test_settings(bus.address())).await?;
    let _daemon = tokio::spawn(application.run());

    assert_eq!(helpers::next_call(&mut calls_rx).await, Some(Call::Disable));
    assert_eq!(
        helpers::next_call(&mut calls_rx).await,
        Some(Call::SetPower(2)),
        "low-power mode must follow disable",
    );
    assert_eq!(helpers::next_call(&mut calls_rx).await, Some(Call::Enable));

    Ok(())
}

#[tokio::test]
async fn registered_modem_is_never_touched() -> color_eyre::Result<()> {
    let Some(bus) = helpers::launch_system_dbus().await else {
        eprintln!("dbus-daemon not available; skipping");
        return Ok(());
    };
    let (calls_tx, mut calls_rx) = mpsc::unbounded_channel();
    let _modem_manager = helpers::serve_modem_manager(
        bus.address(),
        calls_tx,
        helpers::REGISTRATION_HOME,
    )
    .await?;

    let application = Application::build(test_settings(bus.address())).await?;
    let _daemon = tokio::spawn(application.run());

    // Several sweep periods worth of real time without a single control call.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(calls_rx.try_recv().is_err());

    Ok(())
}
