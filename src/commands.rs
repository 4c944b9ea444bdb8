//! One handler per verb. Handlers validate their input before any request,
//! never retry on their own and write rendered output to `out`.

use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use crate::api::ApiRequest;
use crate::auth::Credentials;
use crate::cli::{CheckArgs, FilterArgs, LoginArgs, UpgradeArgs, UserUpdateArgs};
use crate::context::Context;
use crate::output::{self, OutputFormat};
use crate::resources::{Channel, Check, CheckInput, Incident, User, UserInput};
use crate::update::UpdateOutcome;
use crate::validate::{self, ValidationError};

/// Minimum gap between passive update checks.
const NOTICE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const NOTICE_TIMEOUT: Duration = Duration::from_secs(5);

fn emit<T: Serialize + ?Sized>(
    ctx: &Context,
    out: &mut dyn Write,
    value: &T,
    table: impl FnOnce(&T) -> String,
) -> Result<()> {
    let text = match ctx.format {
        OutputFormat::Json => output::json(value)? + "\n",
        OutputFormat::Table => table(value),
    };
    out.write_all(text.as_bytes())?;
    Ok(())
}

pub fn login(ctx: &Context, args: &LoginArgs, out: &mut dyn Write) -> Result<()> {
    let (stored_access, stored_secret) = ctx.session.stored_credentials().unzip();
    let access_key = args
        .access_key
        .clone()
        .or(stored_access)
        .ok_or(ValidationError::Missing("access-key"))?;
    let secret_key = args
        .secret_key
        .clone()
        .or(stored_secret)
        .ok_or(ValidationError::Missing("secret-key"))?;

    ctx.session.login(&access_key, &secret_key)?;
    writeln!(out, "Logged in with access key {access_key}")?;
    Ok(())
}

pub fn logout(ctx: &Context, out: &mut dyn Write) -> Result<()> {
    ctx.session.logout()?;
    writeln!(out, "Logged out")?;
    Ok(())
}

pub fn user_show(ctx: &Context, out: &mut dyn Write) -> Result<()> {
    let user: User = ctx.session.fetch(&ApiRequest::get("user"))?;
    emit(ctx, out, &user, output::user)
}

pub fn user_update(ctx: &Context, args: &UserUpdateArgs, out: &mut dyn Write) -> Result<()> {
    let input = UserInput {
        name: args.name.clone(),
        timezone: args.timezone.clone(),
    };
    if input == UserInput::default() {
        return Err(ValidationError::Value {
            option: "name",
            reason: "nothing to update; pass --name and/or --timezone".to_string(),
        }
        .into());
    }
    let user: User = ctx
        .session
        .fetch(&ApiRequest::put("user").json(serde_json::to_value(&input)?))?;
    emit(ctx, out, &user, output::user)
}

pub fn generate_key(ctx: &Context, out: &mut dyn Write) -> Result<()> {
    let pair: Credentials = ctx.session.fetch(&ApiRequest::post("user/generate-key"))?;
    match ctx.format {
        OutputFormat::Json => writeln!(out, "{}", output::json(&pair)?)?,
        OutputFormat::Table => {
            out.write_all(
                output::record(&[
                    ("access key", pair.access_key.clone()),
                    ("secret key", pair.secret_key.clone()),
                ])
                .as_bytes(),
            )?;
            writeln!(out, "\nThe secret key is shown only once. Run `binocs login` to use this pair.")?;
        }
    }
    Ok(())
}

pub fn invalidate_key(ctx: &Context, out: &mut dyn Write) -> Result<()> {
    ctx.session.send(&ApiRequest::post("user/invalidate-key"))?;
    ctx.session.logout()?;
    writeln!(out, "Key pair invalidated, you have been logged out")?;
    Ok(())
}

/// Turn command-line fields into a request body. `create` demands the
/// fields a new check cannot do without.
fn check_input(args: &CheckArgs, create: bool) -> Result<CheckInput, ValidationError> {
    if create {
        if args.name.as_deref().map_or(true, str::is_empty) {
            return Err(ValidationError::Missing("name"));
        }
        if args.resource.is_none() {
            return Err(ValidationError::Missing("resource"));
        }
    }
    if let Some(resource) = &args.resource {
        validate::resource_url(resource)?;
    }
    let method = args.method.as_deref().map(validate::http_method).transpose()?;
    if args.interval == Some(0) {
        return Err(ValidationError::Value {
            option: "interval",
            reason: "must be at least 1 second".to_string(),
        });
    }
    if let Some(target) = args.target {
        if target.is_nan() || target <= 0.0 {
            return Err(ValidationError::Value {
                option: "target",
                reason: "must be a positive number of seconds".to_string(),
            });
        }
    }
    let regions = args.regions.as_ref().map(|regions| {
        regions
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect::<Vec<_>>()
    });

    let input = CheckInput {
        name: args.name.clone(),
        resource: args.resource.clone(),
        method,
        interval: args.interval,
        target: args.target,
        regions,
        up_codes: args.up_codes.clone(),
        up_confirmations_threshold: args.up_confirmations_threshold,
        down_confirmations_threshold: args.down_confirmations_threshold,
    };
    if !create && input == CheckInput::default() {
        return Err(ValidationError::Value {
            option: "name",
            reason: "nothing to update; pass at least one field".to_string(),
        });
    }
    Ok(input)
}

pub fn check_list(ctx: &Context, out: &mut dyn Write) -> Result<()> {
    let checks: Vec<Check> = ctx.session.fetch(&ApiRequest::get("checks"))?;
    emit(ctx, out, &checks, |c| output::check_list(c))
}

pub fn check_inspect(ctx: &Context, id: &str, out: &mut dyn Write) -> Result<()> {
    let id = validate::ident("check", id)?;
    let check: Check = ctx.session.fetch(&ApiRequest::get(format!("checks/{id}")))?;
    emit(ctx, out, &check, output::check)
}

pub fn check_add(ctx: &Context, args: &CheckArgs, out: &mut dyn Write) -> Result<()> {
    let input = check_input(args, true)?;
    let check: Check = ctx
        .session
        .fetch(&ApiRequest::post("checks").json(serde_json::to_value(&input)?))?;
    emit(ctx, out, &check, |c| format!("Check {} created\n", c.ident))
}

pub fn check_update(ctx: &Context, id: &str, args: &CheckArgs, out: &mut dyn Write) -> Result<()> {
    let id = validate::ident("check", id)?;
    let input = check_input(args, false)?;
    let check: Check = ctx
        .session
        .fetch(&ApiRequest::put(format!("checks/{id}")).json(serde_json::to_value(&input)?))?;
    emit(ctx, out, &check, |c| format!("Check {} updated\n", c.ident))
}

pub fn check_delete(ctx: &Context, id: &str, out: &mut dyn Write) -> Result<()> {
    let id = validate::ident("check", id)?;
    ctx.session.send(&ApiRequest::delete(format!("checks/{id}")))?;
    match ctx.format {
        OutputFormat::Json => writeln!(out, "{}", json!({ "deleted": id }))?,
        OutputFormat::Table => writeln!(out, "Check {id} deleted")?,
    }
    Ok(())
}

fn check_filter(filter: &FilterArgs) -> Result<Option<&str>, ValidationError> {
    filter
        .check
        .as_deref()
        .map(|id| validate::ident("check", id))
        .transpose()
}

pub fn channel_list(ctx: &Context, filter: &FilterArgs, out: &mut dyn Write) -> Result<()> {
    let check = check_filter(filter)?;
    let channels: Vec<Channel> = ctx
        .session
        .fetch(&ApiRequest::get("channels").query("check", check))?;
    emit(ctx, out, &channels, |c| output::channel_list(c))
}

pub fn channel_inspect(ctx: &Context, id: &str, out: &mut dyn Write) -> Result<()> {
    let id = validate::ident("channel", id)?;
    let channel: Channel = ctx.session.fetch(&ApiRequest::get(format!("channels/{id}")))?;
    emit(ctx, out, &channel, output::channel)
}

pub fn incident_list(ctx: &Context, filter: &FilterArgs, out: &mut dyn Write) -> Result<()> {
    let check = check_filter(filter)?;
    let incidents: Vec<Incident> = ctx
        .session
        .fetch(&ApiRequest::get("incidents").query("check", check))?;
    emit(ctx, out, &incidents, |i| output::incident_list(i))
}

pub fn incident_inspect(ctx: &Context, id: &str, out: &mut dyn Write) -> Result<()> {
    let id = validate::ident("incident", id)?;
    let incident: Incident = ctx.session.fetch(&ApiRequest::get(format!("incidents/{id}")))?;
    emit(ctx, out, &incident, output::incident)
}

pub fn regions(ctx: &Context, out: &mut dyn Write) -> Result<()> {
    let regions: Vec<String> = ctx.session.fetch(&ApiRequest::get("regions"))?;
    emit(ctx, out, &regions, |r| {
        r.iter().map(|name| format!("{name}\n")).collect()
    })
}

pub fn upgrade(ctx: &Context, args: &UpgradeArgs, out: &mut dyn Write) -> Result<()> {
    if args.check {
        let availability = ctx.updater.is_update_available()?;
        ctx.session.record_upgrade_check()?;
        if availability.is_newer() {
            writeln!(
                out,
                "Update available: v{} -> v{}. Run `binocs upgrade` to install it.",
                availability.local, availability.remote
            )?;
        } else {
            writeln!(out, "binocs v{} is up to date", availability.local)?;
        }
        return Ok(());
    }

    let outcome = ctx.updater.auto_update()?;
    ctx.session.record_upgrade_check()?;
    match outcome {
        UpdateOutcome::UpToDate(availability) => {
            writeln!(out, "binocs v{} is up to date", availability.local)?
        }
        UpdateOutcome::Updated(version) => writeln!(out, "Upgraded binocs to v{version}")?,
    }
    Ok(())
}

pub fn version(out: &mut dyn Write) -> Result<()> {
    writeln!(out, "binocs v{}", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

/// Best-effort advisory shown at most once per [`NOTICE_INTERVAL`]. Never fails.
pub fn update_notice(ctx: &Context) -> Option<String> {
    if ctx.skip_update_check {
        return None;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    if let Some(last) = ctx.session.last_upgrade_check() {
        if now.saturating_sub(last) < NOTICE_INTERVAL.as_secs() {
            return None;
        }
    }

    let checked = ctx
        .updater
        .clone()
        .with_check_timeout(NOTICE_TIMEOUT)
        .is_update_available();
    if let Err(e) = ctx.session.record_upgrade_check() {
        tracing::debug!(error = %e, "could not record upgrade check");
    }
    match checked {
        Ok(a) if a.is_newer() => Some(format!(
            "A new version of binocs is available: v{} -> v{}. Run `binocs upgrade`.",
            a.local, a.remote
        )),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "passive update check failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{http_client, ApiClient};
    use crate::auth::Session;
    use crate::config::{ConfigStore, Key};
    use crate::update::Updater;
    use httpmock::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::{tempdir, TempDir};

    const ACCESS: &str = "ABCDEFGHIJ";
    const SECRET: &str = "abcdef0123456789";

    struct Harness {
        server: MockServer,
        dir: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                server: MockServer::start(),
                dir: tempdir().unwrap(),
            }
        }

        fn config_path(&self) -> PathBuf {
            self.dir.path().join("config.json")
        }

        fn logged_in(&self) {
            let mut store = ConfigStore::open(&self.config_path()).unwrap();
            store.set(Key::AccessKey, ACCESS);
            store.set(Key::SecretKey, SECRET);
            store.set(Key::AccessToken, "T");
            store.flush().unwrap();
        }

        fn context(&self, local_version: &str, format: OutputFormat) -> Context {
            let client = http_client().unwrap();
            let store = ConfigStore::open(&self.config_path()).unwrap();
            Context {
                session: Session::new(ApiClient::new(client.clone(), &self.server.url("/api")), store),
                updater: Updater::new(client, &self.server.url("/release"), local_version)
                    .with_binary_template("{{VERSION}}/binocs")
                    .with_checksum(false)
                    .with_executable(self.dir.path().join("binocs")),
                format,
                skip_update_check: false,
            }
        }

        fn run(
            &self,
            ctx: &Context,
            f: impl FnOnce(&Context, &mut dyn Write) -> Result<()>,
        ) -> (Result<()>, String) {
            let mut out = Vec::new();
            let result = f(ctx, &mut out);
            (result, String::from_utf8(out).unwrap())
        }
    }

    fn stored(path: &Path, key: Key) -> Option<String> {
        ConfigStore::open(path).unwrap().get(key)
    }

    #[test]
    fn login_happy_path_writes_config() {
        let h = Harness::new();
        h.server.mock(|when, then| {
            when.method(POST).path("/api/authenticate");
            then.status(200).body(r#"{"access_token":"T"}"#);
        });
        let ctx = h.context("1.0.0", OutputFormat::Table);
        let args = LoginArgs {
            access_key: Some(ACCESS.into()),
            secret_key: Some(SECRET.into()),
        };

        let (result, text) = h.run(&ctx, |ctx, out| login(ctx, &args, out));

        result.unwrap();
        assert!(text.contains(ACCESS));
        assert_eq!(stored(&h.config_path(), Key::AccessKey).as_deref(), Some(ACCESS));
        assert_eq!(stored(&h.config_path(), Key::SecretKey).as_deref(), Some(SECRET));
        assert_eq!(stored(&h.config_path(), Key::AccessToken).as_deref(), Some("T"));
    }

    #[test]
    fn login_malformed_key_fails_before_network() {
        let h = Harness::new();
        let any = h.server.mock(|_when, then| {
            then.status(200);
        });
        let ctx = h.context("1.0.0", OutputFormat::Table);
        let args = LoginArgs {
            access_key: Some("abcd".into()),
            secret_key: Some(SECRET.into()),
        };

        let (result, _) = h.run(&ctx, |ctx, out| login(ctx, &args, out));

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("invalid access key"), "{err:#}");
        any.assert_calls(0);
    }

    #[test]
    fn login_without_keys_needs_stored_pair() {
        let h = Harness::new();
        let ctx = h.context("1.0.0", OutputFormat::Table);
        let args = LoginArgs {
            access_key: None,
            secret_key: None,
        };
        let (result, _) = h.run(&ctx, |ctx, out| login(ctx, &args, out));
        assert!(result.unwrap_err().to_string().contains("--access-key"));
    }

    #[test]
    fn checks_list_renders_table() {
        let h = Harness::new();
        h.logged_in();
        h.server.mock(|when, then| {
            when.method(GET).path("/api/checks").header("authorization", "Bearer T");
            then.status(200).body(
                r#"[{"ident":"0a1b2","name":"api","resource":"https://example.com","method":"GET","interval":60,"last_status":1}]"#,
            );
        });
        let ctx = h.context("1.0.0", OutputFormat::Table);

        let (result, text) = h.run(&ctx, check_list);

        result.unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.starts_with("0a1b2"), "{text}");
        assert!(row.contains("up"), "{text}");
    }

    #[test]
    fn json_flag_prints_records() {
        let h = Harness::new();
        h.logged_in();
        h.server.mock(|when, then| {
            when.method(GET).path("/api/regions");
            then.status(200).body(r#"["eu-central","us-east"]"#);
        });
        let ctx = h.context("1.0.0", OutputFormat::Json);

        let (result, text) = h.run(&ctx, regions);

        result.unwrap();
        let parsed: Vec<String> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, vec!["eu-central", "us-east"]);
    }

    #[test]
    fn invalid_identifier_is_rejected_without_request() {
        let h = Harness::new();
        h.logged_in();
        let any = h.server.mock(|_when, then| {
            then.status(200).body("{}");
        });
        let ctx = h.context("1.0.0", OutputFormat::Table);

        for result in [
            h.run(&ctx, |ctx, out| check_inspect(ctx, "../user", out)).0,
            h.run(&ctx, |ctx, out| channel_inspect(ctx, "ABCDE", out)).0,
            h.run(&ctx, |ctx, out| incident_inspect(ctx, "123456", out)).0,
            h.run(&ctx, |ctx, out| {
                channel_list(
                    ctx,
                    &FilterArgs {
                        check: Some("x".into()),
                    },
                    out,
                )
            })
            .0,
        ] {
            let err = result.unwrap_err();
            assert!(err.downcast_ref::<ValidationError>().is_some(), "{err:#}");
        }
        any.assert_calls(0);
    }

    #[test]
    fn channels_filter_by_check() {
        let h = Harness::new();
        h.logged_in();
        let mock = h.server.mock(|when, then| {
            when.method(GET).path("/api/channels").query_param("check", "0a1b2");
            then.status(200)
                .body(r#"[{"ident":"ccccc","type":"email","handle":"ops@example.com"}]"#);
        });
        let ctx = h.context("1.0.0", OutputFormat::Table);
        let filter = FilterArgs {
            check: Some("0a1b2".into()),
        };

        let (result, text) = h.run(&ctx, |ctx, out| channel_list(ctx, &filter, out));

        result.unwrap();
        mock.assert();
        assert!(text.contains("ops@example.com"), "{text}");
    }

    #[test]
    fn server_errors_propagate_unchanged() {
        let h = Harness::new();
        h.logged_in();
        let mock = h.server.mock(|when, then| {
            when.path("/api/checks/0a1b2");
            then.status(500).body("boom");
        });
        let ctx = h.context("1.0.0", OutputFormat::Table);

        let (result, _) = h.run(&ctx, |ctx, out| check_inspect(ctx, "0a1b2", out));

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("500"), "{err:#}");
        mock.assert_calls(1);
    }

    #[test]
    fn check_add_sends_only_given_fields() {
        let h = Harness::new();
        h.logged_in();
        let mock = h.server.mock(|when, then| {
            when.method(POST).path("/api/checks").json_body(serde_json::json!({
                "name": "api",
                "resource": "https://example.com",
                "method": "HEAD",
                "regions": ["eu", "us"],
            }));
            then.status(201).body(r#"{"ident":"0a1b2","name":"api"}"#);
        });
        let ctx = h.context("1.0.0", OutputFormat::Table);
        let args = CheckArgs {
            name: Some("api".into()),
            resource: Some("https://example.com".into()),
            method: Some("head".into()),
            regions: Some(vec!["eu".into(), " us ".into()]),
            ..CheckArgs::default()
        };

        let (result, text) = h.run(&ctx, |ctx, out| check_add(ctx, &args, out));

        result.unwrap();
        mock.assert();
        assert_eq!(text, "Check 0a1b2 created\n");
    }

    #[test]
    fn check_add_requires_name_and_resource() {
        let args = CheckArgs {
            resource: Some("https://example.com".into()),
            ..CheckArgs::default()
        };
        assert_eq!(check_input(&args, true), Err(ValidationError::Missing("name")));
        let args = CheckArgs {
            name: Some("api".into()),
            ..CheckArgs::default()
        };
        assert_eq!(check_input(&args, true), Err(ValidationError::Missing("resource")));
        assert!(check_input(&CheckArgs::default(), false).is_err());
    }

    #[test]
    fn invalidate_key_logs_out() {
        let h = Harness::new();
        h.logged_in();
        let mock = h.server.mock(|when, then| {
            when.method(POST).path("/api/user/invalidate-key");
            then.status(200).body("{}");
        });
        let ctx = h.context("1.0.0", OutputFormat::Table);

        let (result, _) = h.run(&ctx, invalidate_key);

        result.unwrap();
        mock.assert();
        assert_eq!(stored(&h.config_path(), Key::AccessKey), None);
        assert_eq!(stored(&h.config_path(), Key::AccessToken), None);
    }

    #[test]
    fn upgrade_when_current_only_records_the_check() {
        let h = Harness::new();
        h.server.mock(|when, then| {
            when.path("/release/VERSION");
            then.status(200).body("v1.2.4");
        });
        let artifact = h.server.mock(|when, then| {
            when.path("/release/1.2.4/binocs");
            then.status(200).body("new");
        });
        let target = h.dir.path().join("binocs");
        std::fs::write(&target, "old").unwrap();
        let ctx = h.context("v1.2.4", OutputFormat::Table);

        let (result, text) = h.run(&ctx, |ctx, out| upgrade(ctx, &UpgradeArgs { check: false }, out));

        result.unwrap();
        assert_eq!(text, "binocs v1.2.4 is up to date\n");
        artifact.assert_calls(0);
        assert_eq!(std::fs::read(&target).unwrap(), b"old");
        assert!(stored(&h.config_path(), Key::UpgradeLastChecked).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn upgrade_installs_newer_release() {
        let h = Harness::new();
        h.server.mock(|when, then| {
            when.path("/release/VERSION");
            then.status(200).body("v1.2.4");
        });
        h.server.mock(|when, then| {
            when.path("/release/1.2.4/binocs");
            then.status(200).body("new");
        });
        let target = h.dir.path().join("binocs");
        std::fs::write(&target, "old").unwrap();
        let ctx = h.context("v1.2.3", OutputFormat::Table);

        let (result, text) = h.run(&ctx, |ctx, out| upgrade(ctx, &UpgradeArgs { check: false }, out));

        result.unwrap();
        assert_eq!(text, "Upgraded binocs to v1.2.4\n");
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn update_notice_is_throttled() {
        let h = Harness::new();
        let version = h.server.mock(|when, then| {
            when.path("/release/VERSION");
            then.status(200).body("2.0.0");
        });
        let ctx = h.context("1.0.0", OutputFormat::Table);

        let first = update_notice(&ctx);
        let second = update_notice(&ctx);

        assert!(first.unwrap().contains("v2.0.0"));
        assert_eq!(second, None);
        version.assert_calls(1);
    }

    #[test]
    fn update_notice_respects_opt_out() {
        let h = Harness::new();
        let version = h.server.mock(|when, then| {
            when.path("/release/VERSION");
            then.status(200).body("2.0.0");
        });
        let mut ctx = h.context("1.0.0", OutputFormat::Table);
        ctx.skip_update_check = true;

        assert_eq!(update_notice(&ctx), None);
        version.assert_calls(0);
    }
}
