//! Drive the vehicle from the keyboard
//!
//! Run with: cargo run --example drive
//!
//! Type a key and press Enter:
//!   w/a/s/d  move, x  stop
//!   h  headlight, t  taillight, q/e  left/right indicator
//!   b  horn, 0-9  speed (tens of percent), r  rescan, quit  exit

use rover_link_ble::{
    Command, Direction, Light, LinkConfig, LinkEvent, LinkManager, LinkState, Result,
};
use std::collections::HashSet;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_env_filter("warn").init();

    println!("Rover Remote");
    println!("============\n");

    let config = LinkConfig::default().with_scan_timeout(Duration::from_secs(10));
    println!("Looking for a vehicle named like {:?}...\n", config.target_name);

    let manager = LinkManager::new(config).await?;

    let _events = manager.on_event(|event| match event {
        LinkEvent::StateChanged { to, .. } => println!("[link] {}", to),
        LinkEvent::Failure(failure) => println!("[link] {:?}: {}", failure.kind, failure.message),
        LinkEvent::Unrecognized(text) => println!("[vehicle] {}", text),
        LinkEvent::Telemetry(_) => {}
    });

    manager.scan()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut lights: HashSet<Light> = HashSet::new();
    let mut horn = false;
    let mut gauge = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            _ = gauge.tick() => {
                if let Some(telemetry) = manager.telemetry() {
                    println!(
                        "Temperature: {:5.1}°C ({:5.1}°F) [{}]",
                        telemetry.displayed,
                        telemetry.fahrenheit(),
                        telemetry.source
                    );
                }
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };
                let input = line.trim();
                if input == "quit" {
                    break;
                }
                if input == "r" {
                    manager.rescan()?;
                    continue;
                }

                let Some(command) = parse_key(input, &mut lights, &mut horn) else {
                    println!("Unknown key {:?}", input);
                    continue;
                };

                if manager.state() != LinkState::Connected {
                    println!("Not connected ({})", manager.state());
                    continue;
                }

                if let Err(e) = manager.send(command).await {
                    println!("Failed to send {}: {}", command, e);
                }
            }
        }
    }

    manager.shutdown().await?;

    Ok(())
}

/// Map a key to a command, toggling light and horn state.
fn parse_key(input: &str, lights: &mut HashSet<Light>, horn: &mut bool) -> Option<Command> {
    let mut toggle = |light: Light| {
        let on = lights.insert(light);
        if !on {
            lights.remove(&light);
        }
        Command::SetLight(light, on)
    };

    let command = match input {
        "w" => Command::Move(Direction::Up),
        "s" => Command::Move(Direction::Down),
        "a" => Command::Move(Direction::Left),
        "d" => Command::Move(Direction::Right),
        "x" => Command::Move(Direction::Stop),
        "h" => toggle(Light::Head),
        "t" => toggle(Light::Tail),
        "q" => toggle(Light::IndicatorLeft),
        "e" => toggle(Light::IndicatorRight),
        "b" => {
            *horn = !*horn;
            Command::SetHorn(*horn)
        }
        digit => {
            let tens: u8 = digit.parse().ok().filter(|d: &u8| *d <= 9)?;
            Command::set_speed(tens * 10).ok()?
        }
    };

    Some(command)
}
