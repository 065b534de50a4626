//! `topics`: show the Home Assistant identity space for the current tree.

use tabled::settings::Style;
use tabled::{Table, Tabled};

use rehau_bridge_config::InstallationSourceSetting;
use rehau_bridge_core::{TopicSpace, build_topic_space};

use crate::cli::{GlobalOpts, OutputFormat, TopicsArgs};
use crate::error::CliError;

#[derive(Tabled)]
struct TopicRow {
    #[tabled(rename = "Zone")]
    zone: String,
    #[tabled(rename = "Installation")]
    installation: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "State topic")]
    state: String,
    #[tabled(rename = "Commands")]
    commands: String,
}

pub async fn handle(args: &TopicsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (config, path) = super::load(global)?;

    let source = match &args.file {
        Some(file) => super::installation_source(InstallationSourceSetting::File(file.clone()), None)?,
        None => {
            let setting = config
                .vendor
                .installation_source()
                .map_err(|e| CliError::from_config(e, &path))?;
            let tokens = rehau_bridge_config::resolve_vendor_token(&config.vendor)
                .ok()
                .map(|token| super::token_provider(&config.vendor.email, &config.vendor.client_id, token));
            super::installation_source(setting, tokens)?
        }
    };

    let installations = source.fetch().await?;
    let use_group = args.use_group_in_names || config.bridge.use_group_in_names;
    let space = build_topic_space(&installations, use_group);

    for rejected in space.rejected() {
        tracing::warn!(
            zone = %rejected.zone_id,
            installation = %rejected.installation_id,
            reason = %rejected.reason,
            "zone left out of the topic space"
        );
    }

    match args.output {
        OutputFormat::Table => println!("{}", render_table(&space)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&space)?),
    }
    Ok(())
}

fn render_table(space: &TopicSpace) -> String {
    let rows: Vec<TopicRow> = space
        .zones()
        .flat_map(|zone| {
            zone.entities.iter().map(move |entity| TopicRow {
                zone: zone.zone_id.to_string(),
                installation: zone.installation_id.clone(),
                name: zone.display_name.clone(),
                entity: entity.role.to_string(),
                state: entity.state.clone(),
                commands: entity
                    .commands
                    .iter()
                    .map(|(_, topic)| topic.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            })
        })
        .collect();

    if rows.is_empty() {
        return "No zones found.".into();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}
