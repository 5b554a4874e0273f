use hoard_core::models::channel::StorageChannel;
use uuid::Uuid;

/// Initialize tracing for the CLI. `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hoard=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Find a channel by id or, failing that, by exact name.
pub fn find_channel<'a>(channels: &'a [StorageChannel], needle: &str) -> Option<&'a StorageChannel> {
    if let Ok(id) = needle.parse::<Uuid>() {
        if let Some(channel) = channels.iter().find(|c| c.id == id) {
            return Some(channel);
        }
    }
    channels.iter().find(|c| c.name == needle)
}

/// One line of `channels list` output.
pub fn channel_row(channel: &StorageChannel) -> String {
    let mut flags = Vec::new();
    if channel.is_default {
        flags.push("default");
    }
    if channel.builtin {
        flags.push("builtin");
    }
    if !channel.enabled {
        flags.push("disabled");
    }
    format!(
        "{}  {:<20} {:<6} {}",
        channel.id,
        truncate_string(&channel.name, 20),
        channel.backend,
        flags.join(",")
    )
    .trim_end()
    .to_string()
}

/// Truncate a string to max_len characters, appending "..." if truncated.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
