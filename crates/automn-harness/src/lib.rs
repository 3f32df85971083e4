// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-language script harness generation (C3).
//!
//! Each builder produces the full executable source text: a preamble
//! declaring the run id and marker constants, the four helper functions
//! (`AutomnReturn`, `AutomnLog`, `AutomnNotify`, `AutomnRunLog`) observably
//! equivalent across languages, and finally the user's code appended
//! verbatim. Extension selection (`.mjs` vs `.cjs`, `.py`, `.ps1`, `.sh`)
//! is the execution engine's job, not this crate's — the generated Node
//! source here avoids `import`/`export` so it runs unmodified under either
//! extension.

use automn_core::{JSON_DEPTH_LIMIT, MARKER_LOG, MARKER_NOTIFY, MARKER_RETURN};

/// Build the harnessed source for `language`, with `run_id` embedded as a
/// string constant and `code` appended verbatim.
pub fn build_harness(language: automn_core::Language, run_id: &str, code: &str) -> String {
    use automn_core::Language;
    match language {
        Language::Node => node_harness(run_id, code),
        Language::Python => python_harness(run_id, code),
        Language::Powershell => powershell_harness(run_id, code),
        Language::Shell => shell_harness(run_id, code),
    }
}

fn node_harness(run_id: &str, code: &str) -> String {
    format!(
        r#"const __AUTOMN_RUN_ID__ = {run_id_json};
const __MARKER_RETURN__ = {marker_return_json};
const __MARKER_LOG__ = {marker_log_json};
const __MARKER_NOTIFY__ = {marker_notify_json};
const __JSON_DEPTH_LIMIT__ = {depth_limit};

function __automnGuard(value, depth) {{
  if (depth > __JSON_DEPTH_LIMIT__) return null;
  if (value !== null && typeof value === "object") {{
    if (Array.isArray(value)) return value.map((item) => __automnGuard(item, depth + 1));
    const out = {{}};
    for (const key of Object.keys(value)) out[key] = __automnGuard(value[key], depth + 1);
    return out;
  }}
  return value;
}}

function __automnSafeJson(value) {{
  return JSON.stringify(__automnGuard(value, 0));
}}

let __automnReturned = false;
globalThis.AutomnReturn = function (data) {{
  if (__automnReturned) return;
  __automnReturned = true;
  process.stdout.write(__MARKER_RETURN__ + __automnSafeJson(data) + "\n");
}};

globalThis.AutomnLog = function (message, level, context, type) {{
  process.stdout.write(
    __MARKER_LOG__ +
      __automnSafeJson({{
        message,
        level: level || "info",
        context: context || {{}},
        type: type || "general",
      }}) +
      "\n"
  );
}};

globalThis.AutomnNotify = function (audience, message, level) {{
  process.stdout.write(
    __MARKER_NOTIFY__ +
      __automnSafeJson({{ audience: audience ?? null, message, level: level || "info" }}) +
      "\n"
  );
}};

globalThis.AutomnRunLog = function (...values) {{
  const parts = values.map((v) => (typeof v === "string" ? v : __automnSafeJson(v)));
  process.stdout.write(parts.join(" ") + "\n");
}};

// ---- user code ----
{code}
"#,
        run_id_json = json_string(run_id),
        marker_return_json = json_string(MARKER_RETURN),
        marker_log_json = json_string(MARKER_LOG),
        marker_notify_json = json_string(MARKER_NOTIFY),
        depth_limit = JSON_DEPTH_LIMIT,
        code = code,
    )
}

fn python_harness(run_id: &str, code: &str) -> String {
    format!(
        r#"import json
import sys

__AUTOMN_RUN_ID__ = {run_id_json}
__MARKER_RETURN__ = {marker_return_json}
__MARKER_LOG__ = {marker_log_json}
__MARKER_NOTIFY__ = {marker_notify_json}
__JSON_DEPTH_LIMIT__ = {depth_limit}


def __automn_guard(value, depth=0):
    if depth > __JSON_DEPTH_LIMIT__:
        return None
    if isinstance(value, dict):
        return {{k: __automn_guard(v, depth + 1) for k, v in value.items()}}
    if isinstance(value, (list, tuple)):
        return [__automn_guard(v, depth + 1) for v in value]
    return value


def __automn_safe_json(value):
    return json.dumps(__automn_guard(value))


__automn_returned = [False]


def AutomnReturn(data):
    if __automn_returned[0]:
        return
    __automn_returned[0] = True
    sys.stdout.write(__MARKER_RETURN__ + __automn_safe_json(data) + "\n")
    sys.stdout.flush()


def AutomnLog(message, level="info", context=None, type="general"):
    payload = {{
        "message": message,
        "level": level or "info",
        "context": context or {{}},
        "type": type or "general",
    }}
    sys.stdout.write(__MARKER_LOG__ + __automn_safe_json(payload) + "\n")
    sys.stdout.flush()


def AutomnNotify(audience, message, level="info"):
    payload = {{"audience": audience, "message": message, "level": level or "info"}}
    sys.stdout.write(__MARKER_NOTIFY__ + __automn_safe_json(payload) + "\n")
    sys.stdout.flush()


def AutomnRunLog(*values):
    parts = [v if isinstance(v, str) else __automn_safe_json(v) for v in values]
    sys.stdout.write(" ".join(parts) + "\n")
    sys.stdout.flush()


# ---- user code ----
{code}
"#,
        run_id_json = python_literal(run_id),
        marker_return_json = python_literal(MARKER_RETURN),
        marker_log_json = python_literal(MARKER_LOG),
        marker_notify_json = python_literal(MARKER_NOTIFY),
        depth_limit = JSON_DEPTH_LIMIT,
        code = code,
    )
}

fn powershell_harness(run_id: &str, code: &str) -> String {
    format!(
        r#"$OutputEncoding = [System.Text.Encoding]::UTF8
try {{ [Console]::OutputEncoding = [System.Text.Encoding]::UTF8 }} catch {{}}

$global:AutomnRunId = {run_id_literal}
$MARKER_RETURN = {marker_return_literal}
$MARKER_LOG = {marker_log_literal}
$MARKER_NOTIFY = {marker_notify_literal}
$JSON_DEPTH_LIMIT = {depth_limit}

$global:AutomnInputParseError = $null
$global:AutomnInput = $null
$__rawInput = $env:AUTOMN_INTERNAL_INPUT_JSON
if (-not $__rawInput) {{ $__rawInput = $env:AUTOMN_INPUT_JSON }}
if (-not $__rawInput) {{ $__rawInput = $env:INPUT_JSON }}
if ($__rawInput) {{
    try {{
        $global:AutomnInput = $__rawInput | ConvertFrom-Json -Depth $JSON_DEPTH_LIMIT
    }} catch {{
        $global:AutomnInputParseError = $_.Exception.Message
    }}
}}

$script:AutomnReturned = $false
function AutomnReturn {{
    param($Data)
    if ($script:AutomnReturned) {{ return }}
    $script:AutomnReturned = $true
    $json = $Data | ConvertTo-Json -Depth $JSON_DEPTH_LIMIT -Compress
    Write-Output ($MARKER_RETURN + $json)
}}

function AutomnLog {{
    param($Message, $Level = "info", $Context = @{{}}, $Type = "general")
    $payload = @{{ message = $Message; level = $Level; context = $Context; type = $Type }}
    $json = $payload | ConvertTo-Json -Depth $JSON_DEPTH_LIMIT -Compress
    Write-Output ($MARKER_LOG + $json)
}}

function AutomnNotify {{
    param($Audience, $Message, $Level = "info")
    $payload = @{{ audience = $Audience; message = $Message; level = $Level }}
    $json = $payload | ConvertTo-Json -Depth $JSON_DEPTH_LIMIT -Compress
    Write-Output ($MARKER_NOTIFY + $json)
}}

function AutomnRunLog {{
    param([Parameter(ValueFromRemainingArguments = $true)]$Values)
    $parts = $Values | ForEach-Object {{
        if ($_ -is [string]) {{ $_ }} else {{ $_ | ConvertTo-Json -Depth $JSON_DEPTH_LIMIT -Compress }}
    }}
    Write-Output ($parts -join " ")
}}

# ---- user code ----
{code}
"#,
        run_id_literal = powershell_literal(run_id),
        marker_return_literal = powershell_literal(MARKER_RETURN),
        marker_log_literal = powershell_literal(MARKER_LOG),
        marker_notify_literal = powershell_literal(MARKER_NOTIFY),
        depth_limit = JSON_DEPTH_LIMIT,
        code = code,
    )
}

/// The `shell` harness normalizes helper arguments to JSON by shelling out
/// to the already-resolved Node interpreter, a concession noted in the
/// component design rather than a general guarantee of portability.
fn shell_harness(run_id: &str, code: &str) -> String {
    format!(
        r#"#!/bin/sh
AUTOMN_RUN_ID={run_id_sh}
MARKER_RETURN={marker_return_sh}
MARKER_LOG={marker_log_sh}
MARKER_NOTIFY={marker_notify_sh}

__automn_json() {{
  node -e 'const depth={depth_limit};function guard(v,d){{if(d>depth)return null;if(v!==null&&typeof v==="object"){{if(Array.isArray(v))return v.map(x=>guard(x,d+1));const o={{}};for(const k of Object.keys(v))o[k]=guard(v[k],d+1);return o;}}return v;}}let raw=process.argv[1];let value;try{{value=JSON.parse(raw);}}catch(e){{value=raw;}}process.stdout.write(JSON.stringify(guard(value,0)));' "$1"
}}

__automn_returned=0
AutomnReturn() {{
  if [ "$__automn_returned" = "1" ]; then return; fi
  __automn_returned=1
  json=$(__automn_json "$1")
  printf '%s%s\n' "$MARKER_RETURN" "$json"
}}

AutomnLog() {{
  message="$1"; level="${{2:-info}}"; context="${{3:-{{}}}}"; type="${{4:-general}}"
  payload=$(node -e 'const [message,level,context,type]=process.argv.slice(1);let ctx;try{{ctx=JSON.parse(context);}}catch(e){{ctx={{value:context}};}}process.stdout.write(JSON.stringify({{message,level,context:ctx,type}}));' "$message" "$level" "$context" "$type")
  printf '%s%s\n' "$MARKER_LOG" "$payload"
}}

AutomnNotify() {{
  audience="$1"; message="$2"; level="${{3:-info}}"
  payload=$(node -e 'const [audience,message,level]=process.argv.slice(1);process.stdout.write(JSON.stringify({{audience:audience||null,message,level}}));' "$audience" "$message" "$level")
  printf '%s%s\n' "$MARKER_NOTIFY" "$payload"
}}

AutomnRunLog() {{
  printf '%s\n' "$*"
}}

# ---- user code ----
{code}
"#,
        run_id_sh = shell_literal(run_id),
        marker_return_sh = shell_literal(MARKER_RETURN),
        marker_log_sh = shell_literal(MARKER_LOG),
        marker_notify_sh = shell_literal(MARKER_NOTIFY),
        depth_limit = JSON_DEPTH_LIMIT,
        code = code,
    )
}

fn json_string(s: &str) -> String {
    serde_json::to_string(s).expect("string serialization never fails")
}

fn python_literal(s: &str) -> String {
    json_string(s)
}

fn powershell_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn shell_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use automn_core::Language;

    #[test]
    fn node_harness_contains_markers_and_user_code() {
        let src = build_harness(Language::Node, "run-1", "console.log('hi');");
        assert!(src.contains("__SCRIPTRETURN__"));
        assert!(src.contains("globalThis.AutomnReturn"));
        assert!(src.contains("console.log('hi');"));
    }

    #[test]
    fn node_harness_guards_against_second_return() {
        let src = build_harness(Language::Node, "run-1", "");
        assert!(src.contains("if (__automnReturned) return;"));
    }

    #[test]
    fn python_harness_defines_helpers() {
        let src = build_harness(Language::Python, "run-2", "pass");
        assert!(src.contains("def AutomnReturn(data):"));
        assert!(src.contains("def AutomnNotify(audience, message, level=\"info\"):"));
    }

    #[test]
    fn powershell_harness_forces_utf8_and_parses_input_json() {
        let src = build_harness(Language::Powershell, "run-3", "");
        assert!(src.contains("[Console]::OutputEncoding"));
        assert!(src.contains("AUTOMN_INTERNAL_INPUT_JSON"));
        assert!(src.contains("AUTOMN_INPUT_JSON"));
        assert!(src.contains("INPUT_JSON"));
    }

    #[test]
    fn shell_harness_shells_out_to_node_for_json_safety() {
        let src = build_harness(Language::Shell, "run-4", "echo hi");
        assert!(src.contains("node -e"));
        assert!(src.contains("echo hi"));
    }

    #[test]
    fn run_id_with_quote_is_escaped_per_language() {
        let src = build_harness(Language::Powershell, "it's-a-run", "");
        assert!(src.contains("'it''s-a-run'"));
    }
}
