//! Server-rendered HTML for the status and log viewer pages.

use chrono::{DateTime, Utc};

const STYLE_STATUS: &str = r#"
        body { font-family: Arial, sans-serif; text-align: center; padding: 50px; background: #1a1a1a; color: #fff; }
        .container { max-width: 600px; margin: 0 auto; }
        h1 { color: #4CAF50; margin-bottom: 30px; }
        .status { background: #2d2d2d; padding: 20px; border-radius: 8px; margin: 20px 0; }
        .links a { display: inline-block; margin: 10px; padding: 12px 24px; background: #4CAF50; color: white; text-decoration: none; border-radius: 5px; }
        .info { color: #aaa; font-size: 14px; margin-top: 30px; }
"#;

const STYLE_LOG: &str = r#"
        body { font-family: 'Courier New', monospace; margin: 0; padding: 20px; background-color: #1e1e1e; color: #d4d4d4; }
        .container { max-width: 1200px; margin: 0 auto; }
        h1 { color: #569cd6; text-align: center; margin-bottom: 30px; }
        .log-controls { margin-bottom: 20px; text-align: center; }
        button { background-color: #007acc; color: white; border: none; padding: 10px 20px; margin: 0 10px; border-radius: 4px; cursor: pointer; }
        .log-container { background-color: #2d2d30; border: 1px solid #3e3e42; border-radius: 4px; padding: 20px; height: 600px; overflow-y: auto; white-space: pre-wrap; word-wrap: break-word; font-size: 14px; line-height: 1.4; }
        .log-line.error { color: #f48771; }
        .log-line.warning { color: #dcdcaa; }
        .timestamp { color: #808080; }
        .stats { margin-top: 20px; padding: 15px; background-color: #2d2d30; border-radius: 4px; text-align: center; }
"#;

const SCRIPT_LOG: &str = r#"
        let autoRefreshInterval = null;
        function refreshLog() { location.reload(); }
        function clearLog() {
            if (confirm('Clear the server log?')) {
                fetch('/log?action=clear', { method: 'POST' })
                    .then(() => location.reload())
                    .catch(err => alert('Failed to clear log: ' + err.message));
            }
        }
        function downloadLog() { window.location.href = '/log?action=download'; }
        function toggleAutoRefresh() {
            if (document.getElementById('autoRefresh').checked) {
                autoRefreshInterval = setInterval(refreshLog, 5000);
            } else if (autoRefreshInterval) {
                clearInterval(autoRefreshInterval);
                autoRefreshInterval = null;
            }
        }
        const container = document.getElementById('logContainer');
        container.scrollTop = container.scrollHeight;
"#;

pub fn status_page(started_at: DateTime<Utc>, active_rooms: usize) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Relay Server</title>
    <style>{STYLE_STATUS}</style>
</head>
<body>
    <div class="container">
        <h1>Relay Server</h1>
        <div class="status">
            <h3>Server running</h3>
            <p>WebSocket and HTTP services are ready</p>
        </div>
        <div class="links"><a href="/log">View server log</a></div>
        <div class="info">
            <p>Started: {started}</p>
            <p>Active rooms: {active_rooms}</p>
        </div>
    </div>
</body>
</html>"#,
        started = started_at.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

pub fn log_page(content: Option<&str>, file_size: u64, rendered_at: DateTime<Utc>) -> String {
    let (lines, total_lines) = match content {
        Some(text) if !text.is_empty() => (render_log_lines(text), text.lines().count()),
        Some(_) => ("No log entries yet".to_string(), 0),
        None => ("Log file is missing or empty".to_string(), 0),
    };
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Relay Server Log</title>
    <style>{STYLE_LOG}</style>
</head>
<body>
    <div class="container">
        <h1>Relay Server Log</h1>
        <div class="log-controls">
            <button onclick="refreshLog()">Refresh</button>
            <button onclick="clearLog()">Clear</button>
            <button onclick="downloadLog()">Download</button>
            <span class="auto-refresh">
                <input type="checkbox" id="autoRefresh" onchange="toggleAutoRefresh()">
                <label for="autoRefresh">Auto refresh (5s)</label>
            </span>
        </div>
        <div class="log-container" id="logContainer">{lines}</div>
        <div class="stats">
            <strong>Stats:</strong>
            lines: <span id="totalLines">{total_lines}</span> |
            size: <span id="fileSize">{size}</span> |
            updated: <span id="lastUpdate">{rendered}</span>
        </div>
    </div>
    <script>{SCRIPT_LOG}</script>
</body>
</html>"#,
        size = format_size(file_size),
        rendered = rendered_at.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

fn render_log_lines(content: &str) -> String {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let class = if line.contains("ERROR") {
                "log-line error"
            } else if line.contains("WARN") {
                "log-line warning"
            } else {
                "log-line"
            };
            let body = match line.split_once(' ') {
                Some((stamp, rest)) if stamp.starts_with(|c: char| c.is_ascii_digit()) => format!(
                    r#"<span class="timestamp">{}</span> {}"#,
                    escape_html(stamp),
                    escape_html(rest)
                ),
                _ => escape_html(line),
            };
            format!(r#"<div class="{class}">{body}</div>"#)
        })
        .collect()
}

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
