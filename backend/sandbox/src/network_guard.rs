//! Network guard for Node-based guest runtimes.
//!
//! The guard script is preloaded with `--require` before the guest program.
//! It keeps a private reference to the original `fetch`, installs a wrapper
//! that rejects any host outside the allowlist before a connection is made,
//! and refuses to load the raw networking modules from either module system
//! or through `process.getBuiltinModule`. Worker threads are refused too, so
//! no second realm can run without the guard.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

pub const GUARD_FILE_NAME: &str = "network_guard.cjs";

/// Built-in modules that open sockets or spawn processes.
pub const BLOCKED_MODULES: &[&str] = &[
    "net",
    "tls",
    "dgram",
    "dns",
    "http",
    "https",
    "http2",
    "undici",
    "child_process",
    "cluster",
    "worker_threads",
];

const ALLOWED_PLACEHOLDER: &str = "__LMSGUARD_ALLOWED_HOSTS__";
const BLOCKED_PLACEHOLDER: &str = "__LMSGUARD_BLOCKED_MODULES__";

const GUARD_TEMPLATE: &str = r##"'use strict';
(function () {
  const ALLOWED = __LMSGUARD_ALLOWED_HOSTS__;
  const BLOCKED = new Set(__LMSGUARD_BLOCKED_MODULES__);
  const Module = require('module');
  const { isMainThread } = require('worker_threads');

  function hostPermitted(host) {
    const name = String(host || '').toLowerCase().replace(/\.$/, '');
    if (!name) return false;
    return ALLOWED.some(function (entry) {
      if (entry.startsWith('*.')) {
        return name.endsWith(entry.slice(1)) && name.length > entry.length - 1;
      }
      return name === entry;
    });
  }

  function targetHost(input) {
    let raw;
    if (typeof input === 'string') raw = input;
    else if (input && typeof input.href === 'string') raw = input.href;
    else if (input && typeof input.url === 'string') raw = input.url;
    else raw = String(input);
    try {
      return new URL(raw).hostname;
    } catch (_) {
      return '';
    }
  }

  function moduleName(request) {
    let name = String(request);
    if (name.startsWith('node:')) name = name.slice(5);
    return name.split('/')[0];
  }

  function blocked(what) {
    return new Error('[lmsguard] ' + what + ' is blocked by the sandbox network policy');
  }

  const originalFetch = globalThis.fetch;
  if (typeof originalFetch === 'function') {
    const guardedFetch = function fetch(input, init) {
      const host = targetHost(input);
      if (!hostPermitted(host)) {
        return Promise.reject(blocked('Network access to "' + host + '"'));
      }
      return originalFetch.call(this, input, init);
    };
    Object.defineProperty(globalThis, 'fetch', {
      value: guardedFetch,
      writable: false,
      configurable: false,
      enumerable: true,
    });
  }

  const originalLoad = Module._load;
  Object.defineProperty(Module, '_load', {
    value: function (request, parent, isMain) {
      if (BLOCKED.has(moduleName(request))) {
        throw blocked('Module "' + request + '"');
      }
      return originalLoad.apply(this, arguments);
    },
    writable: false,
    configurable: false,
  });

  if (isMainThread && typeof Module.register === 'function') {
    const hook =
      'const BLOCKED = new Set(' + JSON.stringify(Array.from(BLOCKED)) + ');\n' +
      'export async function resolve(specifier, context, nextResolve) {\n' +
      '  let name = specifier.startsWith("node:") ? specifier.slice(5) : specifier;\n' +
      '  name = name.split("/")[0];\n' +
      '  if (BLOCKED.has(name)) {\n' +
      '    throw new Error("[lmsguard] Module \\"" + specifier + "\\" is blocked by the sandbox network policy");\n' +
      '  }\n' +
      '  return nextResolve(specifier, context);\n' +
      '}\n';
    Module.register('data:text/javascript,' + encodeURIComponent(hook));
  }

  if (typeof process.getBuiltinModule === 'function') {
    const originalGetBuiltin = process.getBuiltinModule;
    Object.defineProperty(process, 'getBuiltinModule', {
      value: function getBuiltinModule(id) {
        if (BLOCKED.has(moduleName(id))) {
          throw blocked('Module "' + id + '"');
        }
        return originalGetBuiltin.call(process, id);
      },
      writable: false,
      configurable: false,
    });
  }

  if (typeof process.binding === 'function') {
    process.binding = function () {
      throw blocked('process.binding');
    };
  }
})();
"##;

// ---------------------------------------------------------------------------
// Host allowlist
// ---------------------------------------------------------------------------

/// Normalised host allowlist. `*.example.com` matches subdomains only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostAllowlist {
    entries: BTreeSet<String>,
}

impl HostAllowlist {
    pub fn new<S: AsRef<str>>(hosts: &[S]) -> Self {
        let entries = hosts
            .iter()
            .map(|h| h.as_ref().trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty() && h != "*." && h != "*")
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    /// Same decision the guard script makes at runtime.
    pub fn permits(&self, host: &str) -> bool {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return false;
        }
        self.entries.iter().any(|entry| match entry.strip_prefix('*') {
            Some(suffix) if suffix.starts_with('.') => {
                host.ends_with(suffix) && host.len() > suffix.len()
            }
            _ => *entry == host,
        })
    }
}

// ---------------------------------------------------------------------------
// Script generation
// ---------------------------------------------------------------------------

/// Render the guard script for an allowlist.
pub fn render_network_guard(allowlist: &HostAllowlist) -> String {
    // JSON string arrays are valid JavaScript array literals.
    let hosts = serde_json::to_string(&allowlist.entries()).unwrap_or_else(|_| "[]".to_string());
    let modules = serde_json::to_string(BLOCKED_MODULES).unwrap_or_else(|_| "[]".to_string());
    GUARD_TEMPLATE
        .replace(ALLOWED_PLACEHOLDER, &hosts)
        .replace(BLOCKED_PLACEHOLDER, &modules)
}

/// Write the guard script into `dir` and return its path.
pub fn write_network_guard<S: AsRef<str>>(allowed_hosts: &[S], dir: &Path) -> Result<PathBuf> {
    let allowlist = HostAllowlist::new(allowed_hosts);
    let path = dir.join(GUARD_FILE_NAME);
    fs::write(&path, render_network_guard(&allowlist))
        .with_context(|| format!("Failed to write network guard to {}", path.display()))?;
    debug!(path = %path.display(), hosts = allowlist.entries().len(), "[Sandbox] Network guard written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn node_available() -> bool {
        Command::new("node")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[test]
    fn allowlist_permits_only_listed_hosts() {
        let allow = HostAllowlist::new(&["canvas.example.com"]);
        assert!(allow.permits("canvas.example.com"));
        assert!(allow.permits("Canvas.Example.com."));
        assert!(!allow.permits("evil.example.net"));
        assert!(!allow.permits("canvas.example.com.evil.net"));
        assert!(!allow.permits(""));
    }

    #[test]
    fn wildcard_matches_subdomains_only() {
        let allow = HostAllowlist::new(&["*.instructure.com"]);
        assert!(allow.permits("school.instructure.com"));
        assert!(!allow.permits("instructure.com"));
        assert!(!allow.permits("evilinstructure.com"));
    }

    #[test]
    fn empty_allowlist_permits_nothing() {
        let allow = HostAllowlist::new::<&str>(&[]);
        assert!(allow.is_empty());
        assert!(!allow.permits("canvas.example.com"));
        assert!(HostAllowlist::new(&["*", " "]).is_empty());
    }

    #[test]
    fn script_embeds_allowlist_and_keeps_original_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_network_guard(&["canvas.example.com"], dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), GUARD_FILE_NAME);

        let script = fs::read_to_string(&path).unwrap();
        assert!(script.contains(r#"const ALLOWED = ["canvas.example.com"];"#));
        assert!(script.contains("const originalFetch = globalThis.fetch;"));
        assert!(script.contains(r#""child_process""#));
        assert!(!script.contains(ALLOWED_PLACEHOLDER));
        assert!(!script.contains(BLOCKED_PLACEHOLDER));
    }

    #[test]
    fn guard_rejects_unlisted_host_under_node() {
        if !node_available() {
            eprintln!("node not found; skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let guard = write_network_guard(&["canvas.example.com"], dir.path()).unwrap();
        let script = r#"
            fetch('https://evil.example.net/x').then(
              () => process.exit(0),
              (e) => { console.log(e.message); process.exit(3); }
            );
        "#;
        let output = Command::new("node")
            .arg("--require")
            .arg(&guard)
            .arg("-e")
            .arg(script)
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert!(String::from_utf8_lossy(&output.stdout).contains("evil.example.net"));
    }

    fn run_guarded(preloads: &[&Path], script: &str) -> std::process::Output {
        let mut cmd = Command::new("node");
        for preload in preloads {
            cmd.arg("--require").arg(preload);
        }
        cmd.arg("-e").arg(script).output().unwrap()
    }

    #[test]
    fn guard_forwards_allowlisted_host_to_original_fetch() {
        if !node_available() {
            eprintln!("node not found; skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("stub_fetch.cjs");
        fs::write(
            &stub,
            "globalThis.fetch = async (input) => ({ forwarded: String(input) });\n",
        )
        .unwrap();
        let guard = write_network_guard(&["canvas.example.com"], dir.path()).unwrap();
        let script = r#"
            fetch('https://canvas.example.com/api/v1/courses').then(
              (r) => { console.log(r.forwarded); process.exit(0); },
              (e) => { console.log(e.message); process.exit(3); }
            );
        "#;
        let output = run_guarded(&[&stub, &guard], script);
        assert_eq!(output.status.code(), Some(0));
        assert!(String::from_utf8_lossy(&output.stdout)
            .contains("https://canvas.example.com/api/v1/courses"));
    }

    #[test]
    fn guard_blocks_get_builtin_module_under_node() {
        if !node_available() {
            eprintln!("node not found; skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let guard = write_network_guard(&["canvas.example.com"], dir.path()).unwrap();
        let script = r#"
            if (typeof process.getBuiltinModule !== 'function') process.exit(5);
            try { process.getBuiltinModule('node:net'); process.exit(0); }
            catch (e) { console.log(e.message); process.exit(4); }
        "#;
        let output = run_guarded(&[&guard], script);
        // 5: runtime predates getBuiltinModule, nothing to bypass
        assert!(matches!(output.status.code(), Some(4) | Some(5)));
        if output.status.code() == Some(4) {
            assert!(String::from_utf8_lossy(&output.stdout).contains("blocked"));
        }
    }

    #[test]
    fn guard_blocks_worker_threads_under_node() {
        if !node_available() {
            eprintln!("node not found; skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let guard = write_network_guard(&["canvas.example.com"], dir.path()).unwrap();

        let required = run_guarded(
            &[&guard],
            "try { require('node:worker_threads'); process.exit(0); } \
             catch (e) { console.log(e.message); process.exit(4); }",
        );
        assert_eq!(required.status.code(), Some(4));

        let imported = run_guarded(
            &[&guard],
            r#"
            import('node:worker_threads').then(
              ({ Worker }) => {
                const w = new Worker("import('node:net').then(() => console.log('worker net'))", { eval: true });
                w.on('exit', () => process.exit(0));
              },
              (e) => { console.log(e.message); process.exit(4); }
            );
            "#,
        );
        assert!(!String::from_utf8_lossy(&imported.stdout).contains("worker net"));
        assert_ne!(imported.status.code(), Some(0));
    }

    #[test]
    fn guard_blocks_raw_socket_modules_under_node() {
        if !node_available() {
            eprintln!("node not found; skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let guard = write_network_guard(&["canvas.example.com"], dir.path()).unwrap();
        let script = r#"
            try { require('node:net'); process.exit(0); }
            catch (e) { console.log(e.message); process.exit(4); }
        "#;
        let output = Command::new("node")
            .arg("--require")
            .arg(&guard)
            .arg("-e")
            .arg(script)
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(4));
        assert!(String::from_utf8_lossy(&output.stdout).contains("blocked"));
    }
}
