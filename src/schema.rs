//! Self-description - the CLI surface and the RPC method table.
//!
//! `schema.llm` is shaped for tool-use prompts: every method carries a JSON
//! schema for its params, the same way an MCP `tools/list` answer would.

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::BUILTIN_PRESETS;

/// One RPC method as exposed to a model.
#[derive(Debug, Clone, Serialize)]
pub struct MethodDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Value,
}

fn no_params() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Filter keys accepted by every method that scans.
fn filter_properties() -> serde_json::Map<String, Value> {
    let props = json!({
        "include": {
            "type": "array",
            "items": { "type": "string" },
            "description": "Glob patterns a file must match (default: everything)"
        },
        "exclude": {
            "type": "array",
            "items": { "type": "string" },
            "description": "Glob patterns to leave out"
        },
        "extensions": {
            "type": "array",
            "items": { "type": "string" },
            "description": "Only keep these extensions, without the dot (e.g. ['rs', 'toml'])"
        },
        "maxFileSize": {
            "type": "integer",
            "description": "Skip files larger than this many bytes (default: 1048576)"
        },
        "sort": {
            "type": "string",
            "enum": ["path", "size", "extension"],
            "default": "path"
        },
        "preset": {
            "type": "string",
            "description": "Named option preset",
            "examples": BUILTIN_PRESETS
        },
        "force": {
            "type": "boolean",
            "description": "Rescan even if a fresh cached scan exists",
            "default": false
        }
    });
    match props {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

fn root_property() -> Value {
    json!({
        "type": "string",
        "description": "Project directory (absolute, or relative to the daemon's working directory)"
    })
}

/// Method table with JSON-schema params.
pub fn method_definitions() -> Vec<MethodDefinition> {
    let mut scan_props = filter_properties();
    scan_props.insert("root".into(), root_property());
    scan_props.insert(
        "includeFiles".into(),
        json!({ "type": "boolean", "description": "Also return every relative path", "default": false }),
    );

    let mut bundle_props = filter_properties();
    bundle_props.insert("root".into(), root_property());
    bundle_props.insert(
        "format".into(),
        json!({ "type": "string", "enum": ["markdown", "json", "yaml", "plain"], "default": "markdown" }),
    );
    bundle_props.insert(
        "tree".into(),
        json!({ "type": "boolean", "description": "Prepend a directory tree", "default": true }),
    );
    bundle_props.insert("lineNumbers".into(), json!({ "type": "boolean", "default": false }));
    bundle_props.insert(
        "outFile".into(),
        json!({ "type": "string", "description": "Write the bundle here (relative paths resolve against root)" }),
    );
    bundle_props.insert(
        "includeContent".into(),
        json!({ "type": "boolean", "description": "Return the bundle text in the response", "default": false }),
    );

    vec![
        MethodDefinition {
            name: "daemon.status",
            description: "Daemon pid, version, uptime, counters and cached projects.",
            params: no_params(),
        },
        MethodDefinition {
            name: "daemon.ping",
            description: "Liveness check. Returns pong and the daemon's clock in ms.",
            params: no_params(),
        },
        MethodDefinition {
            name: "daemon.shutdown",
            description: "Stop the daemon shortly after answering.",
            params: no_params(),
        },
        MethodDefinition {
            name: "project.scan",
            description: "Discover the files of a project (gitignore-aware, binaries and \
                oversized files skipped) and cache the result. Returns counts, byte \
                totals and an extension histogram.",
            params: json!({ "type": "object", "properties": scan_props, "required": ["root"] }),
        },
        MethodDefinition {
            name: "bundle.generate",
            description: "Render a project's files into one document. Reuses the cached \
                scan when its options match.",
            params: json!({ "type": "object", "properties": bundle_props, "required": ["root"] }),
        },
        MethodDefinition {
            name: "tokens.estimate",
            description: "Token estimate and per-model fit for a cached project. Never \
                scans; fails with -32001 if the project has no fresh scan.",
            params: json!({
                "type": "object",
                "properties": { "root": root_property() },
                "required": ["root"]
            }),
        },
        MethodDefinition {
            name: "history.list",
            description: "Generated bundles, newest first.",
            params: json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "description": "Maximum entries to return" },
                    "project": { "type": "string", "description": "Only bundles of this root" }
                }
            }),
        },
        MethodDefinition {
            name: "history.get",
            description: "One history entry by id.",
            params: json!({
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            }),
        },
        MethodDefinition {
            name: "history.stats",
            description: "Totals over the whole bundle history.",
            params: no_params(),
        },
        MethodDefinition {
            name: "schema.cli",
            description: "Commands and flags of the ctxpack CLI.",
            params: no_params(),
        },
        MethodDefinition {
            name: "schema.llm",
            description: "This method table.",
            params: no_params(),
        },
        MethodDefinition {
            name: "cache.clear",
            description: "Drop one project's cached scan, or every cached scan when no \
                project is given.",
            params: json!({
                "type": "object",
                "properties": { "project": root_property() }
            }),
        },
        MethodDefinition {
            name: "cache.stats",
            description: "Size, limits and per-project age of the scan cache.",
            params: no_params(),
        },
    ]
}

/// `schema.llm` result.
pub fn llm_schema() -> Value {
    json!({ "methods": method_definitions() })
}

/// `schema.cli` result.
pub fn cli_schema() -> Value {
    let filters = json!([
        { "flag": "--include <GLOB>", "repeatable": true },
        { "flag": "--exclude <GLOB>", "repeatable": true },
        { "flag": "--ext <EXT>", "repeatable": true },
        { "flag": "--max-file-size <BYTES>" },
        { "flag": "--sort <path|size|extension>" },
        { "flag": "--preset <NAME>" },
        { "flag": "--force" }
    ]);
    json!({
        "name": "ctxpack",
        "version": env!("CARGO_PKG_VERSION"),
        "globalFlags": [
            { "flag": "-r, --root <DIR>", "default": "." },
            { "flag": "--socket <PATH>" },
            { "flag": "--no-daemon", "description": "Work in-process even if a daemon is running" }
        ],
        "commands": [
            {
                "name": "bundle",
                "description": "Generate a bundle of the project",
                "flags": filters.clone(),
                "extraFlags": [
                    { "flag": "-f, --format <markdown|json|yaml|plain>" },
                    { "flag": "--no-tree" },
                    { "flag": "--line-numbers" },
                    { "flag": "-o, --out <FILE>" }
                ]
            },
            { "name": "scan", "description": "Scan and summarise the project", "flags": filters },
            { "name": "tokens", "description": "Token estimate for a scanned project" },
            {
                "name": "daemon",
                "description": "Manage the background daemon",
                "subcommands": ["start [--foreground]", "stop", "status", "ping"]
            },
            { "name": "cache", "description": "Inspect or clear the daemon cache", "subcommands": ["stats", "clear [PROJECT]"] },
            { "name": "history", "description": "Bundle history", "subcommands": ["list [--limit N]", "show <ID>", "stats"] },
            { "name": "schema", "description": "Print this description", "flags": [{ "flag": "--llm" }] }
        ],
        "presets": BUILTIN_PRESETS,
        "formats": ["markdown", "json", "yaml", "plain"]
    })
}
