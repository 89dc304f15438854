use {anyhow::Result, clap::Subcommand, serde_json::Value};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print which config file would be loaded.
    Path,
    /// Print the effective configuration as TOML, secrets redacted.
    Show,
}

pub fn handle_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => {
            match parley_config::find_config_file() {
                Some(path) => println!("{}", path.display()),
                None => eprintln!("No config file found; defaults apply."),
            }
            Ok(())
        },
        ConfigAction::Show => {
            let config = parley_config::discover_and_load();
            let mut value = serde_json::to_value(&config)?;
            redact(&mut value);
            println!("{}", toml::to_string_pretty(&value)?);
            Ok(())
        },
    }
}

const SECRET_KEYS: &[&str] = &["app_password"];

/// Mask secrets and drop nulls, which TOML cannot represent.
fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for (key, v) in map.iter_mut() {
                if SECRET_KEYS.contains(&key.as_str()) && v.is_string() {
                    *v = Value::String("[REDACTED]".into());
                } else {
                    redact(v);
                }
            }
        },
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {},
    }
}
