//! Renderers for resource records. Every function returns the text so
//! commands decide where it goes.

use serde::Serialize;

use crate::resources::{Channel, Check, Incident, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Table
        }
    }
}

pub fn json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Left-aligned columns sized to the widest cell, two spaces apart.
pub fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = line(headers, &widths);
    out.push('\n');
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        out.push_str(&line(&cells, &widths));
        out.push('\n');
    }
    out
}

fn line(cells: &[&str], widths: &[usize]) -> String {
    let mut out = String::new();
    for (i, cell) in cells.iter().enumerate() {
        match widths.get(i) {
            Some(&width) if i + 1 < cells.len() => {
                out.push_str(&format!("{cell:<width$}  "));
            }
            _ => out.push_str(cell),
        }
    }
    out.trim_end().to_string()
}

/// `label: value` pairs with the values aligned.
pub fn record(fields: &[(&str, String)]) -> String {
    let width = fields.iter().map(|(l, _)| l.len()).max().unwrap_or(0) + 1;
    fields
        .iter()
        .map(|(label, value)| format!("{:<width$} {}\n", format!("{label}:"), value, width = width))
        .collect()
}

fn or_dash(value: &str) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

pub fn user(user: &User) -> String {
    let mut fields = vec![
        ("name", or_dash(&user.name)),
        ("email", or_dash(&user.email)),
        ("timezone", or_dash(&user.timezone)),
    ];
    if let Some(credits) = user.credits_left {
        fields.push(("credits left", credits.to_string()));
    }
    fields.push(("created", or_dash(&user.created)));
    record(&fields)
}

fn status_label(status: Option<i64>) -> &'static str {
    match status {
        Some(1) => "up",
        Some(2) => "degraded",
        Some(3) => "down",
        _ => "unknown",
    }
}

pub fn check_list(checks: &[Check]) -> String {
    let rows: Vec<Vec<String>> = checks
        .iter()
        .map(|c| {
            vec![
                c.ident.clone(),
                or_dash(&c.name),
                status_label(c.last_status).to_string(),
                format!("{}s", c.interval),
                or_dash(&c.method),
                c.resource.clone(),
            ]
        })
        .collect();
    table(&["ID", "NAME", "STATUS", "INTERVAL", "METHOD", "RESOURCE"], &rows)
}

pub fn check(check: &Check) -> String {
    record(&[
        ("id", check.ident.clone()),
        ("name", or_dash(&check.name)),
        ("resource", check.resource.clone()),
        ("method", or_dash(&check.method)),
        ("interval", format!("{}s", check.interval)),
        ("target", format!("{}s", check.target)),
        ("regions", or_dash(&check.regions.join(", "))),
        ("up codes", or_dash(&check.up_codes)),
        (
            "confirmations",
            format!(
                "{} up / {} down",
                check.up_confirmations_threshold, check.down_confirmations_threshold
            ),
        ),
        ("status", status_label(check.last_status).to_string()),
        ("last code", or_dash(&check.last_status_code)),
        ("last duration", or_dash(&check.last_status_duration)),
        ("created", or_dash(&check.created)),
        ("updated", or_dash(&check.updated)),
    ])
}

pub fn channel_list(channels: &[Channel]) -> String {
    let rows: Vec<Vec<String>> = channels
        .iter()
        .map(|c| {
            vec![
                c.ident.clone(),
                or_dash(&c.kind),
                or_dash(&c.alias),
                c.handle.clone(),
            ]
        })
        .collect();
    table(&["ID", "TYPE", "ALIAS", "HANDLE"], &rows)
}

pub fn channel(channel: &Channel) -> String {
    record(&[
        ("id", channel.ident.clone()),
        ("type", or_dash(&channel.kind)),
        ("alias", or_dash(&channel.alias)),
        ("handle", or_dash(&channel.handle)),
        ("verified", channel.verified.to_string()),
        ("last used", or_dash(&channel.used)),
        ("created", or_dash(&channel.created)),
    ])
}

pub fn incident_list(incidents: &[Incident]) -> String {
    let rows: Vec<Vec<String>> = incidents
        .iter()
        .map(|i| {
            vec![
                i.ident.clone(),
                or_dash(&i.check_ident),
                or_dash(&i.state),
                or_dash(&i.opened),
                or_dash(&i.resolved),
            ]
        })
        .collect();
    table(&["ID", "CHECK", "STATE", "OPENED", "RESOLVED"], &rows)
}

pub fn incident(incident: &Incident) -> String {
    record(&[
        ("id", incident.ident.clone()),
        ("check", or_dash(&incident.check_ident)),
        ("state", or_dash(&incident.state)),
        ("opened", or_dash(&incident.opened)),
        ("resolved", or_dash(&incident.resolved)),
        ("note", or_dash(&incident.note)),
    ])
}
