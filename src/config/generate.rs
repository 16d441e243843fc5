pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# CHANSYNC CONFIGURATION
# =============================================================================
# chansync incrementally copies message history from whitelisted Slack
# conversations into a single append-only JSONL file, remembering per channel
# how far it got so restarts resume where they left off.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/chansync/config.yml
#   3. /etc/chansync/config.yml
#
# Any value may reference an environment variable as $env{...}.

# =============================================================================
# SLACK
# =============================================================================

slack:
  # Bot token with users.conversations and conversations.history scopes
  token: $env{SLACK_BOT_TOKEN}
  api_base: https://slack.com/api
  timeout: 30s

# =============================================================================
# FILES
# =============================================================================

# One entry per line: channel name, channel ID (C…, G…, D…) or user ID (U…)
# for a direct message. A leading '#' is stripped, the line is still used.
whitelist: ~/.config/chansync/channels.txt

# Append-only history; one JSON message per line with an added "cid" field
output: ~/chansync/history.jsonl

# One <channel-id>.ts file per channel holding the last recorded timestamp
state_dir: ~/.local/state/chansync

# =============================================================================
# SYNC
# =============================================================================

sync:
  # Pause between poll cycles
  poll_interval: 1h
  # How far back the first run for a channel reaches
  lookback: 30days
  # Messages requested per history page
  page_size: 15
  # Conversations requested per directory page
  directory_page_size: 200
  # Sleep used when a rate-limit response carries no Retry-After header
  rate_limit_fallback: 60s
  # Optional ceiling on any single rate-limit sleep
  # max_rate_limit_wait: 10m
  # abort_cycle: a failing channel stops the rest of the cycle
  # skip_source: log the failure and continue with the next channel
  on_fetch_error: abort_cycle

# =============================================================================
# PUBLISH (optional)
# =============================================================================
# Run once per cycle after all channels are synced. The output path is
# appended as the last argument; stdout is logged as the published address.

# publish:
#   command: ["node", "datasources/protectData.js"]
"#
    .to_string()
}
