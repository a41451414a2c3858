//! Config command - show effective configuration

use std::path::Path;

use waypoint_core::Config;

pub fn show(config: &Config, explicit_path: Option<&Path>) {
    println!("Waypoint Configuration");
    println!("======================");
    println!();
    println!("Identity:");
    match &config.identity {
        Some(identity) => println!("  {} <{}>", identity.name, identity.email),
        None => println!("  (not set - checkpoints will fail)"),
    }
    println!();
    println!("Throttle:");
    println!("  max_concurrent_commands: {}", config.throttle.max_concurrent_commands);
    println!("  max_queue_size: {}", config.throttle.max_queue_size);
    println!("  command_timeout: {:?}", config.throttle.command_timeout);
    println!("  circuit_breaker_threshold: {}", config.throttle.circuit_breaker_threshold);
    println!("  circuit_breaker_cooldown: {:?}", config.throttle.circuit_breaker_cooldown);
    println!("  retry_delay: {:?}", config.throttle.retry_delay);
    println!("  max_retries: {}", config.throttle.max_retries);
    println!();
    println!("Messages:");
    println!("  command: {}", config.message.command.as_deref().unwrap_or("(template)"));
    println!("  timeout: {:?}", config.message.timeout);
    println!();
    println!("Project defaults:");
    println!("  min_changed_files_threshold: {}", config.project.min_changed_files_threshold);
    println!("  min_changed_lines_threshold: {}", config.project.min_changed_lines_threshold);
    println!("  sync_branch_patterns: {:?}", config.project.sync_branch_patterns);
    println!("  remote_enabled: {}", config.project.remote_enabled);
    println!("  remote_name: {}", config.project.remote_name);
    println!();
    println!("Watch:");
    println!("  interval: {:?}", config.watch.interval);
    println!("  push: {}", config.watch.push);
    println!();

    let path = explicit_path
        .map(Path::to_path_buf)
        .or_else(Config::default_config_path);
    if let Some(path) = path {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
}
