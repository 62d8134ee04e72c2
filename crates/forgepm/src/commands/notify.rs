//! Notification configuration command

use anyhow::{bail, Result};
use forgepm_notify::{notify_config_path, InstanceEvent, NotificationManager, Notifier, NotifyConfig};

use crate::cli::{NotifyArgs, NotifyCommand};
use crate::output::{print_error, print_info, print_success};

pub async fn execute(args: NotifyArgs) -> Result<()> {
    match args.command {
        NotifyCommand::Discord { webhook, username } => configure_discord(webhook, username),
        NotifyCommand::Remove { channel } => remove_channel(&channel),
        NotifyCommand::Events { set } => set_events(&set),
        NotifyCommand::Status => show_status(),
        NotifyCommand::Test => test_notification().await,
    }
}

fn configure_discord(webhook: String, username: Option<String>) -> Result<()> {
    if !webhook.starts_with("https://") {
        print_error("Webhook URL must start with https://");
        bail!("Invalid webhook URL");
    }

    let mut config = NotifyConfig::load().unwrap_or_default();
    config.set_discord(webhook);
    if let Some(discord) = config.discord.as_mut() {
        discord.username = username;
    }
    config.save()?;

    print_success("Discord notifications configured");
    print_info(&format!("Config saved to: {}", notify_config_path().display()));
    print_info("Restart the daemon (forgepm kill) to pick up the change");
    Ok(())
}

fn remove_channel(channel: &str) -> Result<()> {
    let mut config = NotifyConfig::load().unwrap_or_default();

    match channel.to_lowercase().as_str() {
        "discord" => {
            config.remove_discord();
            config.save()?;
            print_success("Discord notifications removed");
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown notification channel: {}", channel));
            bail!("Unknown channel: {}", channel)
        }
    }
}

fn set_events(events_str: &str) -> Result<()> {
    let mut config = NotifyConfig::load().unwrap_or_default();

    let events: Vec<String> = events_str
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    config.set_events(events.clone());

    if let Err(e) = config.validate_events() {
        print_error(&e.to_string());
        bail!(e);
    }
    config.save()?;

    if events.is_empty() {
        print_success("Event filter cleared - will notify on all events");
    } else {
        print_success(&format!("Events set to: {}", events.join(", ")));
    }
    Ok(())
}

fn show_status() -> Result<()> {
    let config = NotifyConfig::load().unwrap_or_default();

    println!();
    println!("Notification Configuration");
    println!("{}", "=".repeat(40));

    match config.discord {
        Some(ref discord) => {
            // Only the webhook's tail; the token is a secret
            let url = &discord.webhook_url;
            println!("Discord: configured");
            println!("  Webhook: ...{}", url.get(url.len().saturating_sub(6)..).unwrap_or(""));
            if let Some(ref username) = discord.username {
                println!("  Username: {}", username);
            }
        }
        None => println!("Discord: not configured"),
    }

    println!();
    if config.events.is_empty() {
        println!("Events: all (no filter)");
    } else {
        println!("Events: {}", config.events.join(", "));
    }

    println!();
    println!("Config file: {}", notify_config_path().display());
    Ok(())
}

async fn test_notification() -> Result<()> {
    let config = NotifyConfig::load().unwrap_or_default();
    if !config.is_configured() {
        print_error("No notification channels configured");
        print_info("Run 'forgepm notify discord --webhook <URL>' to configure");
        bail!("Not configured");
    }

    let manager = NotificationManager::new(config);
    print_info("Sending test notification...");

    let event = InstanceEvent::Started {
        instance: "test".to_string(),
        name: "Test Server".to_string(),
    };
    match manager.send_event(&event).await {
        Ok(()) => {
            print_success("Test notification sent");
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to send test notification: {}", e));
            bail!("Test notification failed: {}", e)
        }
    }
}
