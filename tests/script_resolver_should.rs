use std::process::Command as StdCommand;
use std::sync::Arc;
use std::time::Duration;

use pahe_relay::{
    AppConfig,
    server::{
        error::{Error, OUTPUT_EXCERPT_CHARS},
        services::{
            fetcher_services::MockRemoteFetcherTrait,
            resolver_services::{PageScan, ScriptResolver, ScriptResolverTrait},
            sandbox_services::{
                MockScriptSandboxTrait, NodeSandbox, ScriptSandboxTrait, permission_flag,
            },
        },
        utils::{
            m3u8_utils::find_manifest_url,
            script_utils::{
                PAYLOAD_MISSING_MESSAGE, ScriptCandidate, prepare_script, select_script_candidate,
            },
        },
    },
};
use url::Url;

const PACKED_PLAYER: &str = "eval(function(p,a,c,k,e,d){var source='x.m3u8';return p}('0',1,1,'q'.split('|'),0,{}))";

fn page_with_scripts(scripts: &[&str]) -> String {
    let blocks: String = scripts
        .iter()
        .map(|script| format!("<script type=\"text/javascript\">{}</script>\n", script))
        .collect();
    format!("<html><head></head><body><div id=\"player\"></div>{}</body></html>", blocks)
}

fn fetcher_returning(html: String) -> MockRemoteFetcherTrait {
    let mut fetcher = MockRemoteFetcherTrait::new();
    fetcher
        .expect_fetch_text()
        .times(1)
        .returning(move |_, _| Ok(html.clone()));
    fetcher
}

fn player_page() -> Url {
    Url::parse("https://kwik.si/e/Ab1080").unwrap()
}

fn resolver(fetcher: MockRemoteFetcherTrait, sandbox: MockScriptSandboxTrait) -> ScriptResolver {
    ScriptResolver::new(Arc::new(fetcher), Arc::new(sandbox), &AppConfig::default())
}

#[tokio::test]
async fn test_direct_manifest_skips_sandbox() {
    let html = page_with_scripts(&[
        "const src = 'https://cdn.example/video/master.m3u8?sig=abc';",
        PACKED_PLAYER,
    ]);

    let mut sandbox = MockScriptSandboxTrait::new();
    sandbox.expect_execute().times(0);

    let resolved = resolver(fetcher_returning(html), sandbox)
        .resolve("https://kwik.si/e/Ab1080")
        .await
        .unwrap();

    assert_eq!(resolved, "https://cdn.example/video/master.m3u8?sig=abc");
}

#[tokio::test]
async fn test_sandbox_output_resolves() {
    let html = page_with_scripts(&["var ga = 1;", PACKED_PLAYER]);

    let mut sandbox = MockScriptSandboxTrait::new();
    sandbox
        .expect_execute()
        .times(1)
        .withf(|script| script.contains("var source='x.m3u8'") && script.contains("console.log"))
        .returning(|_| Ok("https://vault-07.example.org/stream/07/index.m3u8\n".to_string()));

    let resolved = resolver(fetcher_returning(html), sandbox)
        .resolve("https://kwik.si/e/Ab1080")
        .await
        .unwrap();

    assert_eq!(resolved, "https://vault-07.example.org/stream/07/index.m3u8");
}

#[tokio::test]
async fn test_no_manifest_in_output_is_resolution_error() {
    let html = page_with_scripts(&[PACKED_PLAYER]);
    let noisy_output = format!("{}\n{}", PAYLOAD_MISSING_MESSAGE, "x".repeat(5000));

    let mut sandbox = MockScriptSandboxTrait::new();
    sandbox
        .expect_execute()
        .times(1)
        .returning(move |_| Ok(noisy_output.clone()));

    let result = resolver(fetcher_returning(html), sandbox)
        .resolve("https://kwik.si/e/Ab1080")
        .await;

    match result {
        Err(Error::Resolution { message, output }) => {
            assert!(message.starts_with("Failed to resolve stream host: Could not resolve .m3u8"));
            assert_eq!(output.chars().count(), OUTPUT_EXCERPT_CHARS);
            assert!(output.starts_with(PAYLOAD_MISSING_MESSAGE));
        }
        other => panic!("expected a resolution error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_page_without_scripts_is_not_found() {
    let html = "<html><body><p>video not found</p></body></html>".to_string();

    let mut sandbox = MockScriptSandboxTrait::new();
    sandbox.expect_execute().times(0);

    let result = resolver(fetcher_returning(html), sandbox)
        .resolve("https://kwik.si/e/gone")
        .await;

    match result {
        Err(error @ Error::NotFound(_)) => {
            assert_eq!(error.category(), "not_found");
            assert!(error.to_string().contains("No candidate <script> block"));
        }
        other => panic!("expected not found, got {:?}", other),
    }
}

#[test]
fn test_relevant_script_beats_longer_one() {
    let long_irrelevant = format!("eval(function(){{var pad='{}';}})", "z".repeat(800));
    let html = page_with_scripts(&["var ga = 1;", &long_irrelevant, PACKED_PLAYER]);

    let scan = ScriptResolver::scan_page(&html, &player_page()).unwrap();

    assert_eq!(scan, PageScan::Script(PACKED_PLAYER.to_string()));
}

#[test]
fn test_longest_eval_when_nothing_relevant() {
    let scripts = ["var ga = 1;", "eval(aa)", "eval(bbbb)", "eval(cccc)"];

    assert_eq!(
        select_script_candidate(&scripts),
        Some(ScriptCandidate::LongestEval(2))
    );
    assert_eq!(select_script_candidate(&["var ga = 1;"]), None);
    assert_eq!(
        select_script_candidate(&["eval(a)", "eval(Plyr)"]),
        Some(ScriptCandidate::Relevant(1))
    );
}

#[test]
fn test_data_src_fallback_is_absolute() {
    let html = r#"<html><body><video id="v" data-src="/stream/hls/master.m3u8?t=9"></video></body></html>"#;

    let scan = ScriptResolver::scan_page(html, &player_page()).unwrap();

    assert_eq!(
        scan,
        PageScan::Resolved("https://kwik.si/stream/hls/master.m3u8?t=9".to_string())
    );
}

#[tokio::test]
async fn test_resolve_data_src_relative_to_page() {
    let html = r#"<html><body><video data-src="hls/master.m3u8"></video></body></html>"#.to_string();

    let mut sandbox = MockScriptSandboxTrait::new();
    sandbox.expect_execute().times(0);

    let resolved = resolver(fetcher_returning(html), sandbox)
        .resolve("https://kwik.si/e/Ab1080")
        .await
        .unwrap();

    assert_eq!(resolved, "https://kwik.si/e/hls/master.m3u8");
}

#[test]
fn test_prepare_script_hoists_payload() {
    let prepared = prepare_script("var q = 'abc' + document.cookie;\nconsole.log(1);");

    assert!(prepared.starts_with("window.q = 'abc' + DOC_STUB.cookie;"));
    assert!(!prepared.contains("document"));
    assert!(prepared.contains(PAYLOAD_MISSING_MESSAGE));
}

fn node_available() -> bool {
    StdCommand::new("node")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn unrestricted_sandbox(timeout_secs: u64) -> NodeSandbox {
    let config = AppConfig {
        sandbox_timeout_secs: timeout_secs,
        sandbox_permissions: false,
        ..AppConfig::default()
    };
    NodeSandbox::new(&config)
}

#[tokio::test]
async fn test_node_sandbox_prints_payload() {
    if !node_available() {
        eprintln!("node not installed, skipping");
        return;
    }

    let sandbox = unrestricted_sandbox(10);
    let output = sandbox
        .execute(&prepare_script(
            "var q = 'https://cdn.example/hls/index.m3u8' + document.cookie;",
        ))
        .await
        .unwrap();

    assert_eq!(output.trim(), "https://cdn.example/hls/index.m3u8");
}

#[tokio::test]
async fn test_node_sandbox_hides_node_globals() {
    if !node_available() {
        eprintln!("node not installed, skipping");
        return;
    }

    let sandbox = unrestricted_sandbox(10);
    let output = sandbox
        .execute(
            "console.log(typeof require, typeof process, typeof globalThis.process, \
             typeof fetch, typeof module, typeof Buffer);",
        )
        .await
        .unwrap();

    assert_eq!(
        output.trim(),
        "undefined undefined undefined undefined undefined undefined"
    );
}

#[tokio::test]
async fn test_node_sandbox_resolves_with_default_config() {
    if !node_available() {
        eprintln!("node not installed, skipping");
        return;
    }

    let sandbox = NodeSandbox::new(&AppConfig::default());
    let output = sandbox
        .execute(&prepare_script(
            "var q = 'https://cdn.example/hls/index.m3u8' + document.cookie;",
        ))
        .await
        .unwrap();

    assert_eq!(
        find_manifest_url(&output).as_deref(),
        Some("https://cdn.example/hls/index.m3u8")
    );
}

#[tokio::test]
async fn test_node_sandbox_cannot_reach_network() {
    if !node_available() {
        eprintln!("node not installed, skipping");
        return;
    }

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let port = listener.local_addr().unwrap().port();

    let escape = format!(
        r#"
const attempts = [];
try {{
  const p = this.constructor.constructor('return process')();
  p.mainModule.require('net').connect({port}, '127.0.0.1');
  attempts.push('CONNECTED via constructor');
}} catch (e) {{ attempts.push('constructor blocked'); }}
try {{
  globalThis.process.mainModule.require('net').connect({port}, '127.0.0.1');
  attempts.push('CONNECTED via globalThis');
}} catch (e) {{ attempts.push('globalThis blocked'); }}
try {{
  fetch('http://127.0.0.1:{port}/');
  attempts.push('CONNECTED via fetch');
}} catch (e) {{ attempts.push('fetch blocked'); }}
console.log(attempts.join(','));
"#,
        port = port
    );

    for sandbox in [
        NodeSandbox::new(&AppConfig::default()),
        unrestricted_sandbox(10),
    ] {
        let output = sandbox.execute(&escape).await.unwrap();

        assert!(!output.contains("CONNECTED"), "sandbox escaped: {}", output);
        assert!(output.contains("constructor blocked,globalThis blocked,fetch blocked"));
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    match listener.accept() {
        Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::WouldBlock),
        Ok((_, peer)) => panic!("sandbox opened a connection from {}", peer),
    }
}

#[test]
fn test_permission_flag_follows_node_release() {
    assert_eq!(permission_flag("v18.19.0"), None);
    assert_eq!(permission_flag("v20.11.0"), Some("--experimental-permission"));
    assert_eq!(permission_flag("v22.12.0"), Some("--experimental-permission"));
    assert_eq!(permission_flag("v22.13.0"), Some("--permission"));
    assert_eq!(permission_flag("v24.1.0\n"), Some("--permission"));
    assert_eq!(permission_flag("garbage"), None);
}

#[tokio::test]
async fn test_node_sandbox_kills_runaway_script() {
    if !node_available() {
        eprintln!("node not installed, skipping");
        return;
    }

    let sandbox = unrestricted_sandbox(1);
    let result = sandbox.execute("while (true) {}").await;

    match result {
        Err(error @ Error::Resolution { .. }) => {
            assert!(error.to_string().contains("timed out"));
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
}
