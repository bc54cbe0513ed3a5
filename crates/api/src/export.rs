//! Project export documents.
//!
//! A project export bundles the project, its devices and every payload and
//! target system they reference. JSON exports keep configs verbatim; HTML
//! exports are meant for sharing and mask credentials.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use iotsim_core::target_system::schema::mask_secrets;
use iotsim_core::types::Timestamp;
use iotsim_db::models::device::Device;
use iotsim_db::models::payload::Payload;
use iotsim_db::models::project::Project;
use iotsim_db::models::target_system::TargetSystem;
use iotsim_db::repositories::{DeviceRepo, PayloadRepo, TargetSystemRepo};
use iotsim_db::DbPool;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ProjectExport {
    pub project: Project,
    pub devices: Vec<Device>,
    pub payloads: Vec<Payload>,
    pub target_systems: Vec<TargetSystem>,
    pub exported_at: Timestamp,
}

impl ProjectExport {
    /// Collect a project and everything its devices reference.
    pub async fn load(pool: &DbPool, project: Project) -> Result<Self, sqlx::Error> {
        let devices = DeviceRepo::list_by_project(pool, project.id).await?;

        let payload_ids: BTreeSet<_> = devices.iter().filter_map(|d| d.payload_id).collect();
        let target_ids: BTreeSet<_> = devices.iter().filter_map(|d| d.target_system_id).collect();

        let mut payloads = Vec::with_capacity(payload_ids.len());
        for id in payload_ids {
            if let Some(p) = PayloadRepo::find_by_id(pool, id).await? {
                payloads.push(p);
            }
        }
        let mut target_systems = Vec::with_capacity(target_ids.len());
        for id in target_ids {
            if let Some(t) = TargetSystemRepo::find_by_id(pool, id).await? {
                target_systems.push(t);
            }
        }

        Ok(Self {
            project,
            devices,
            payloads,
            target_systems,
            exported_at: chrono::Utc::now(),
        })
    }

    /// Attachment file name without extension, e.g. `greenhouse-sensors-export`.
    pub fn file_stem(&self) -> String {
        let slug: String = self
            .project
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let slug = slug
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        if slug.is_empty() {
            format!("project-{}-export", self.project.id)
        } else {
            format!("{slug}-export")
        }
    }

    /// Render a standalone HTML report with secrets masked.
    pub fn render_html(&self) -> String {
        let mut html = String::new();
        let title = escape(&self.project.name);

        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
             <title>{title} export</title>\n<style>\n\
             body{{font-family:sans-serif;margin:2rem;}}\
             table{{border-collapse:collapse;width:100%;margin-bottom:2rem;}}\
             th,td{{border:1px solid #ccc;padding:4px 8px;text-align:left;vertical-align:top;}}\
             pre{{margin:0;white-space:pre-wrap;}}\n\
             </style>\n</head>\n<body>\n<h1>{title}</h1>\n"
        );
        if let Some(desc) = &self.project.description {
            let _ = writeln!(html, "<p>{}</p>", escape(desc));
        }
        let _ = writeln!(
            html,
            "<p>Exported {}</p>",
            self.exported_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        html.push_str("<h2>Devices</h2>\n<table>\n<tr><th>Name</th><th>Type</th><th>Interval (s)</th><th>Enabled</th><th>Payload</th><th>Target system</th></tr>\n");
        for d in &self.devices {
            let payload = d
                .payload_id
                .and_then(|id| self.payloads.iter().find(|p| p.id == id))
                .map(|p| escape(&p.name))
                .unwrap_or_else(|| "-".to_string());
            let target = d
                .target_system_id
                .and_then(|id| self.target_systems.iter().find(|t| t.id == id))
                .map(|t| escape(&t.name))
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{payload}</td><td>{target}</td></tr>",
                escape(&d.name),
                escape(&d.device_type),
                d.send_interval,
                if d.is_enabled { "yes" } else { "no" },
            );
        }
        html.push_str("</table>\n");

        html.push_str("<h2>Payloads</h2>\n<table>\n<tr><th>Name</th><th>Type</th><th>Definition</th></tr>\n");
        for p in &self.payloads {
            let definition = match (&p.schema, &p.python_code) {
                (Some(schema), _) if p.payload_type == "visual" => {
                    serde_json::to_string_pretty(&schema.0).unwrap_or_default()
                }
                (_, Some(code)) => code.clone(),
                _ => String::new(),
            };
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td><pre>{}</pre></td></tr>",
                escape(&p.name),
                escape(&p.payload_type),
                escape(&definition),
            );
        }
        html.push_str("</table>\n");

        html.push_str("<h2>Target systems</h2>\n<table>\n<tr><th>Name</th><th>Type</th><th>Configuration</th></tr>\n");
        for t in &self.target_systems {
            let config = match t.kind() {
                Ok(kind) => mask_secrets(kind, &t.config.0),
                Err(_) => serde_json::json!({}),
            };
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td><pre>{}</pre></td></tr>",
                escape(&t.name),
                escape(&t.system_type),
                escape(&serde_json::to_string_pretty(&config).unwrap_or_default()),
            );
        }
        html.push_str("</table>\n</body>\n</html>\n");
        html
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
