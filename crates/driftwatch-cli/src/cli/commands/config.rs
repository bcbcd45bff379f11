use super::{exit_codes, open};
use crate::cli::args::{ConfigArgs, ConfigSub};
use driftwatch_core::config::settings::OperatorSettings;
use driftwatch_core::errors::SettingsError;
use std::path::Path;

pub async fn run(args: ConfigArgs, config_path: &Path, strict: bool) -> anyhow::Result<i32> {
    let ws = open(config_path, strict).await?;
    let store = ws.store.as_ref();

    match args.cmd {
        ConfigSub::List => {
            let settings = OperatorSettings::load(store).await?;
            for (key, value) in settings.entries() {
                let about = OperatorSettings::describe(key).unwrap_or_default();
                println!("{key:<18} = {value:<24} # {about}");
            }
            Ok(exit_codes::OK)
        }
        ConfigSub::Get { key } => {
            let settings = OperatorSettings::load(store).await?;
            match settings.get(&key) {
                Ok(value) => {
                    println!("{value}");
                    Ok(exit_codes::OK)
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    Ok(exit_codes::CONFIG_ERROR)
                }
            }
        }
        ConfigSub::Set { key, value } => match OperatorSettings::save(store, &key, &value).await {
            Ok(normalized) => {
                println!("{key} = {normalized}");
                Ok(exit_codes::OK)
            }
            Err(e) => match e.downcast_ref::<SettingsError>() {
                Some(invalid) => {
                    eprintln!("error: {invalid}");
                    Ok(exit_codes::CONFIG_ERROR)
                }
                None => Err(e),
            },
        },
    }
}
