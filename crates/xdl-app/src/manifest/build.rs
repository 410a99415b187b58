//! Manifest assembly

use serde_json::{json, Map, Value};
use xdl_core::prelude::*;
use xdl_core::{determine_entry_point, guess_main_module_path, ProjectConfig, UrlType};

use crate::url::{encode_uri, encode_uri_component, BundleQuery, UrlContext, UrlOptions};

/// Environment prefixes passed through to the client
const ENV_PREFIXES: &[&str] = &["REACT_NATIVE_", "EXPO_"];

/// Manifest fields holding a local asset path; each gets a sibling `{field}Url`
pub const ASSET_FIELDS: &[&str] = &[
    "icon",
    "notification.icon",
    "loading.icon",
    "loading.backgroundImage",
    "splash.image",
    "ios.icon",
    "ios.splash.image",
    "ios.splash.tabletImage",
    "android.icon",
    "android.splash.mdpi",
    "android.splash.hdpi",
    "android.splash.xhdpi",
    "android.splash.xxhdpi",
    "android.splash.xxxhdpi",
];

pub const DEFAULT_PLATFORM: &str = "ios";

/// What the requesting client told us about itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestRequest {
    pub platform: Option<String>,
    pub request_host: Option<String>,
}

impl ManifestRequest {
    pub fn platform(&self) -> &str {
        self.platform.as_deref().unwrap_or(DEFAULT_PLATFORM)
    }
}

/// Who the manifest is served as
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOwner {
    User(String),
    Anonymous { client_id: String },
}

/// Build the manifest served to a client
pub fn build_manifest(
    ctx: &UrlContext,
    config: &ProjectConfig,
    request: &ManifestRequest,
    developer_tool: &str,
    owner: &ManifestOwner,
) -> Result<Map<String, Value>> {
    let host = request.request_host.as_deref();
    let platform = request.platform();
    let mut manifest = config.exp.raw.clone();

    manifest.insert("xde".into(), Value::Bool(true));
    manifest.insert(
        "developer".into(),
        json!({"tool": developer_tool, "projectRoot": ctx.root.to_string_lossy()}),
    );
    manifest.insert("packagerOpts".into(), serde_json::to_value(&ctx.settings)?);
    manifest.insert("env".into(), Value::Object(passthrough_env()));

    let entry_point = determine_entry_point(config, platform);
    let main_module = guess_main_module_path(&entry_point);
    let bundle_path = format!(
        "/{}.bundle?platform={}&{}",
        encode_uri(&main_module),
        encode_uri_component(platform),
        ctx.bundle_query(&BundleQuery::from(&ctx.settings)),
    );
    let bundle_base = ctx.bundle_url(&UrlOptions::url_type(UrlType::Http), host)?;
    let bundle_url = format!("{bundle_base}{bundle_path}");

    manifest.insert("bundleUrl".into(), Value::from(bundle_url.clone()));
    manifest.insert("debuggerHost".into(), Value::from(ctx.debugger_host(host)?));
    manifest.insert("mainModuleName".into(), Value::from(main_module));
    manifest.insert("logUrl".into(), Value::from(ctx.log_url(host)?));
    manifest.insert("hostUri".into(), Value::from(ctx.host_uri(host)?));

    if let Some(origin) = url_origin(&bundle_url) {
        resolve_asset_urls(&mut manifest, &format!("{origin}assets/"));
    }

    let slug = config
        .exp
        .slug
        .clone()
        .or_else(|| config.exp.name.clone())
        .unwrap_or_default();
    let id = match owner {
        ManifestOwner::User(username) => format!("@{username}/{slug}"),
        ManifestOwner::Anonymous { client_id } => format!("@anonymous/{slug}-{client_id}"),
    };
    manifest.insert("id".into(), Value::from(id));

    Ok(manifest)
}

/// `scheme://host:port/` of a URL
pub fn url_origin(url: &str) -> Option<String> {
    let scheme_end = url.find("://")? + 3;
    let path_start = url[scheme_end..]
        .find('/')
        .map_or(url.len(), |i| scheme_end + i);
    Some(format!("{}/", &url[..path_start]))
}

/// Add `{field}Url` next to every local asset path in [`ASSET_FIELDS`]
pub fn resolve_asset_urls(manifest: &mut Map<String, Value>, assets_base: &str) {
    for field in ASSET_FIELDS {
        let mut segments: Vec<&str> = field.split('.').collect();
        let Some(leaf) = segments.pop() else {
            continue;
        };

        let mut parent = Some(&mut *manifest);
        for segment in &segments {
            parent = parent.and_then(|p| p.get_mut(*segment)).and_then(Value::as_object_mut);
        }
        let Some(parent) = parent else {
            continue;
        };
        let Some(path) = parent.get(leaf).and_then(Value::as_str) else {
            continue;
        };
        if path.starts_with("http://") || path.starts_with("https://") {
            continue;
        }

        let relative = path.trim_start_matches("./");
        let url = format!("{assets_base}{}", encode_uri(relative));
        parent.insert(format!("{leaf}Url"), Value::from(url));
    }
}

fn passthrough_env() -> Map<String, Value> {
    std::env::vars()
        .filter(|(key, _)| ENV_PREFIXES.iter().any(|p| key.starts_with(p)))
        .map(|(key, value)| (key, Value::from(value)))
        .collect()
}

/// Envelope served when the manifest cannot be signed
pub fn unsigned_envelope(manifest_string: &str) -> String {
    json!({"manifestString": manifest_string, "signature": "UNSIGNED"}).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::config::{PackagerInfo, ProjectSettings};
    use crate::url::UrlEnv;
    use xdl_core::{ConfigSource, ExpConfig, HostType, PackageJson};

    fn fixture(exp: Value) -> (UrlContext, ProjectConfig) {
        let exp = ExpConfig::from_value(exp).unwrap();
        let root = PathBuf::from("/work/app");
        let ctx = UrlContext {
            root: root.clone(),
            settings: ProjectSettings {
                host_type: HostType::Localhost,
                ..Default::default()
            },
            packager_info: PackagerInfo {
                packager_port: Some(19001),
                expo_server_port: Some(19000),
                ..Default::default()
            },
            exp: exp.clone(),
            env: UrlEnv::default(),
            offline: false,
        };
        let config = ProjectConfig {
            root,
            source: ConfigSource::AppJson,
            exp,
            pkg: PackageJson::default(),
        };
        (ctx, config)
    }

    #[test]
    fn test_manifest_fields() {
        let (ctx, config) = fixture(json!({
            "name": "My App",
            "slug": "my-app",
            "sdkVersion": "10.0.0",
            "icon": "./assets/icon.png",
            "android": {"splash": {"xhdpi": "splash.png", "mdpi": "https://cdn/x.png"}}
        }));
        let request = ManifestRequest {
            platform: Some("android".into()),
            request_host: None,
        };
        let owner = ManifestOwner::Anonymous {
            client_id: "c-1".into(),
        };
        let manifest = build_manifest(&ctx, &config, &request, "xdl", &owner).unwrap();

        assert_eq!(manifest["xde"], true);
        assert_eq!(manifest["name"], "My App");
        assert_eq!(manifest["developer"]["tool"], "xdl");
        assert_eq!(manifest["developer"]["projectRoot"], "/work/app");
        assert_eq!(manifest["packagerOpts"]["hostType"], "localhost");
        assert_eq!(
            manifest["bundleUrl"],
            "http://localhost:19001/index.bundle?platform=android&dev=true&strict=false\
             &minify=false&hot=false&includeAssetFileHashes=true"
        );
        assert_eq!(manifest["debuggerHost"], "localhost:19001");
        assert_eq!(manifest["mainModuleName"], "index");
        assert_eq!(manifest["logUrl"], "http://localhost:19000/logs");
        assert_eq!(manifest["hostUri"], "localhost:19000");
        assert_eq!(manifest["iconUrl"], "http://localhost:19001/assets/assets/icon.png");
        assert_eq!(
            manifest["android"]["splash"]["xhdpiUrl"],
            "http://localhost:19001/assets/splash.png"
        );
        assert!(manifest["android"]["splash"].get("mdpiUrl").is_none());
        assert_eq!(manifest["id"], "@anonymous/my-app-c-1");
    }

    #[test]
    fn test_logged_in_id() {
        let (ctx, config) = fixture(json!({"slug": "my-app"}));
        let manifest = build_manifest(
            &ctx,
            &config,
            &ManifestRequest::default(),
            "xdl",
            &ManifestOwner::User("jane".into()),
        )
        .unwrap();
        assert_eq!(manifest["id"], "@jane/my-app");
        assert!(manifest["bundleUrl"]
            .as_str()
            .unwrap()
            .contains("platform=ios"));
    }

    #[test]
    fn test_url_origin() {
        assert_eq!(
            url_origin("http://h:1/a/b?c").as_deref(),
            Some("http://h:1/")
        );
        assert_eq!(url_origin("http://h:1").as_deref(), Some("http://h:1/"));
        assert_eq!(url_origin("h:1"), None);
    }

    #[test]
    fn test_unsigned_envelope() {
        let envelope: Value = serde_json::from_str(&unsigned_envelope("{\"a\":1}")).unwrap();
        assert_eq!(envelope["signature"], "UNSIGNED");
        assert_eq!(envelope["manifestString"], "{\"a\":1}");
    }
}
