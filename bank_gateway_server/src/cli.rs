use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 28] = [
        "RUST_LOG",
        "BGW_HOST",
        "BGW_PORT",
        "BGW_DATABASE_URL",
        "BGW_REPLICA_DATABASE_URL",
        "BGW_FALLBACK_KV_PATH",
        "BGW_ORDER_EXPIRY_MINUTES",
        "BGW_EXPIRY_INTERVAL_SECS",
        "BGW_WEBHOOK_RETRY_INTERVAL_SECS",
        "BGW_WEBHOOK_RETRY_BATCH",
        "BGW_WEBHOOK_RETRY_DELAY_MS",
        "BGW_WEBHOOK_TIMEOUT_SECS",
        "BGW_STORE_TIMEOUT_MS",
        "BGW_BREAKER_FAILURE_THRESHOLD",
        "BGW_BREAKER_ERROR_RATE",
        "BGW_BREAKER_WINDOW_SECS",
        "BGW_BREAKER_MIN_CALLS",
        "BGW_BREAKER_COOLDOWN_SECS",
        "BGW_CACHE_CAPACITY",
        "BGW_CACHE_TTL_HOURS",
        "BGW_DEPOSIT_DELIVERY_MODE",
        "BGW_WITHDRAW_DELIVERY_MODE",
        "BGW_AUTH_MAX_ATTEMPTS",
        "BGW_AUTH_WINDOW_SECS",
        "BGW_AUTH_LOCKOUT_SECS",
        "BGW_USE_X_FORWARDED_FOR",
        "BGW_USE_FORWARDED",
        "BGW_START_WORKERS",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
