pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# SHOVEL CONFIGURATION
# =============================================================================
# Tails one delimited file and loads its rows into a DuckDB table.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/shovel/config.yml
#   3. /etc/shovel/config.yml
#
# Values may reference environment variables with $env{NAME}.

# =============================================================================
# SOURCE
# =============================================================================
source:
  path: /var/log/app/events.csv
  # Codec label such as 'utf-8', 'latin1' or 'windows-1252'. Invalid bytes
  # are an error unless the label ends in '-lossy', e.g. 'utf-8-lossy'.
  encoding: utf-8
  delimiter: ","
  # Omit to take column names from the first row of the file
  # columns: [timestamp, request_id, status, message]
  # Leading lines to discard (default: 1 when columns come from the header, else 0)
  # skip_lines: 1
  # Keep only every nth line after the skip
  # every_nth: 10
  # Rewrite each line before splitting; both keys must be set together
  # regex_search: '^(\d{4}-\d{2}-\d{2})T'
  # regex_replace: '${1} '
  # 'off', 'events' (file change notifications) or a poll interval such as '5s'
  watch: events
  event_timeout: 60s
  # Pad rows that are missing trailing fields with NULL instead of failing
  pad_short_rows: false
  # Field text stored as NULL (use ~ to disable)
  null_text: "null"

# =============================================================================
# INDEX
# =============================================================================
# Used by 'shovel index'; maps timestamps and identifiers to file offsets.
index:
  # path: /var/log/app/events.csv.index
  date_column: timestamp
  # strptime format, 'iso8601', 'epoch' or 'epoch_ms'
  date_format: '%Y-%m-%d %H:%M:%S'
  # identifier_column: request_id

# =============================================================================
# SINK
# =============================================================================
# The table must carry a UNIQUE constraint covering offset_column (and
# server_name_column when set) so re-delivered rows are ignored.
sink:
  connection: /var/lib/shovel/events.duckdb
  # schema: main
  table: events
  offset_column: file_offset
  line_column: file_line
  # server_name_column: host
  # server_name: web-1        # defaults to the host name
  rows_per_commit: 1000
  workers: 1
  commit_delay: 0s
"#
    .to_string()
}
