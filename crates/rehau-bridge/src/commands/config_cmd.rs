//! `config show` / `config path`.

use rehau_bridge_config::Config;

use crate::cli::{ConfigCommand, GlobalOpts};
use crate::error::CliError;

const MASK: &str = "********";

pub fn handle(cmd: &ConfigCommand, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        ConfigCommand::Path => {
            println!("{}", super::config_file(global).display());
            Ok(())
        }
        ConfigCommand::Show => {
            let (config, path) = super::load(global)?;
            let rendered = rehau_bridge_config::to_toml(&masked(config))
                .map_err(|e| CliError::from_config(e, &path))?;
            print!("{rendered}");
            Ok(())
        }
    }
}

fn masked(mut config: Config) -> Config {
    if config.vendor.token.is_some() {
        config.vendor.token = Some(MASK.into());
    }
    if config.homeassistant.password.is_some() {
        config.homeassistant.password = Some(MASK.into());
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_masked() {
        let mut config = Config::default();
        config.vendor.token = Some("secret-token".into());
        config.homeassistant.password = Some("secret-pw".into());

        let shown = masked(config);
        assert_eq!(shown.vendor.token.as_deref(), Some(MASK));
        assert_eq!(shown.homeassistant.password.as_deref(), Some(MASK));
    }

    #[test]
    fn absent_secrets_stay_absent() {
        let shown = masked(Config::default());
        assert!(shown.vendor.token.is_none());
        assert!(shown.homeassistant.password.is_none());
    }
}
