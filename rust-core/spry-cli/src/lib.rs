//! # Spry CLI
//!
//! Process host for the Spry pipeline. Turns one process invocation (CLI
//! arguments, CGI environment, standard input) into a single
//! [`RequestContext::run`] call and writes the result to standard output.
//!
//! Applications register their controllers and components on a
//! [`RequestContext`] and hand it to [`main_with`].

pub mod cli;

use clap::Parser;
use cli::Cli;
use serde_json::{Map, Value};
use spry_core::request::parse_query_string;
use spry_core::{parse_json, ConfigSource, ControllerRef, Output, RequestContext, RequestInput, Result, RunArgs};
use std::collections::HashMap;
use std::io::{IsTerminal, Read, Write};
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Default log directive when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVE: &str = "spry=info";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Install JSON logging on standard error
///
/// Standard output is reserved for the response. A subscriber that is
/// already installed is kept.
pub fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = DEFAULT_DIRECTIVE.parse() {
        filter = filter.add_directive(directive);
    }
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(std::io::stderr)
        .try_init()
    {
        debug!(error = %err, "Tracing subscriber already installed");
    }
}

/// Whether the environment describes a CGI request
#[must_use]
pub fn is_cgi(vars: &HashMap<String, String>) -> bool {
    vars.get("REQUEST_METHOD").is_some_and(|m| !m.trim().is_empty())
}

/// Translate arguments into run arguments
///
/// # Errors
///
/// Returns a JSON error if `--params` or `--meta` is not valid JSON.
pub fn run_args(cli: &Cli) -> Result<RunArgs> {
    let mut args = RunArgs {
        config: cli.config.as_deref().map(ConfigSource::from_arg),
        cron: cli.cron,
        process: cli.process.then_some(true),
        path: cli.path.clone(),
        ..RunArgs::default()
    };

    if let Some(controller) = cli.controller.as_deref().filter(|c| !c.trim().is_empty()) {
        args.controller = Some(ControllerRef::parse(controller.trim()));
    }
    if let Some(params) = cli.params.as_deref() {
        args.params = Some(parse_json::<Value>(params)?);
    }
    if let Some(meta) = cli.meta.as_deref() {
        args.meta = Some(parse_json::<Map<String, Value>>(meta)?);
    }
    Ok(args)
}

/// Build request input from the environment and standard input
///
/// Under CGI the request comes from `REQUEST_METHOD`, `REQUEST_URI`,
/// `QUERY_STRING`, `CONTENT_TYPE` and `HTTP_*` variables, with the body on
/// standard input. Otherwise this is a command-line run and standard input
/// is kept as such.
#[must_use]
pub fn request_from_env(cli: &Cli, vars: &HashMap<String, String>, stdin: Option<String>) -> RequestInput {
    let stdin = stdin.unwrap_or_default();

    if !is_cgi(vars) {
        let mut input = match cli.method.as_deref() {
            Some(method) => RequestInput::new(method, "").with_cli(true),
            None => RequestInput::cli(),
        };
        if let Some(test) = vars.get("SpryTest") {
            input = input.with_header("SpryTest", test.clone());
        }
        return input.with_stdin(stdin);
    }

    let method = vars.get("REQUEST_METHOD").map_or("POST", String::as_str);
    let uri = vars.get("REQUEST_URI").cloned().unwrap_or_default();
    let has_query = uri.contains('?');
    let mut input = RequestInput::new(method, uri);

    if !has_query {
        if let Some(query) = vars.get("QUERY_STRING").filter(|q| !q.is_empty()) {
            input = input.with_query(parse_query_string(Some(query)));
        }
    }

    for (name, value) in vars {
        if let Some(header) = name.strip_prefix("HTTP_") {
            input = input.with_header(&header.replace('_', "-"), value.clone());
        }
    }
    if let Some(test) = vars.get("SpryTest") {
        input = input.with_header("SpryTest", test.clone());
    }

    let content_type = vars.get("CONTENT_TYPE").map(String::as_str).unwrap_or_default();
    if let Some(content_type) = vars.get("CONTENT_TYPE") {
        input = input.with_header("Content-Type", content_type.clone());
    }

    if content_type.trim().to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE) {
        input.with_form_body(&stdin)
    } else if stdin.is_empty() {
        input
    } else {
        input.with_body(stdin)
    }
}

/// Write the output document
///
/// In CGI mode the header lines and a blank line come first.
///
/// # Errors
///
/// Returns any write error.
pub fn write_output<W: Write>(output: &Output, cgi: bool, out: &mut W) -> std::io::Result<()> {
    if cgi {
        for header in &output.headers {
            writeln!(out, "{header}")?;
        }
        if !output.body.is_empty() {
            writeln!(out, "Content-Type: application/json")?;
        }
        writeln!(out)?;
    }
    out.write_all(output.body.as_bytes())?;
    if !cgi && !output.body.is_empty() {
        writeln!(out)?;
    }
    out.flush()
}

fn read_stdin() -> Option<String> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return None;
    }
    let mut buffer = String::new();
    match stdin.read_to_string(&mut buffer) {
        Ok(_) => Some(buffer),
        Err(err) => {
            error!(error = %err, "Failed to read standard input");
            None
        }
    }
}

/// Run the process as one request against a prepared context
pub fn main_with(mut ctx: RequestContext) -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let args = match run_args(&cli) {
        Ok(args) => args,
        Err(err) => {
            error!(error = %err, "Invalid arguments");
            return ExitCode::from(2);
        }
    };

    let vars: HashMap<String, String> = std::env::vars().collect();
    let cgi = is_cgi(&vars);
    let input = request_from_env(&cli, &vars, read_stdin());

    let output = ctx.run(args, input);
    match write_output(&output, cgi, &mut std::io::stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Failed to write output");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn test_init_tracing_twice() {
        init_tracing();
        init_tracing();
        tracing::info!("still logging");
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "spry",
            "config.json",
            "--path",
            "/users/",
            "--controller",
            "Users::list",
            "--params",
            r#"{"page":2}"#,
            "--meta",
            r#"{"job":"nightly"}"#,
            "--cron",
        ])
        .unwrap();
        let args = run_args(&cli).unwrap();
        assert_eq!(args.path.as_deref(), Some("/users/"));
        assert_eq!(args.controller, Some(ControllerRef::named("Users", "list")));
        assert_eq!(args.params, Some(json!({"page": 2})));
        assert_eq!(args.meta.unwrap()["job"], "nightly");
        assert!(args.cron);
        assert_eq!(args.process, None);
        assert_eq!(args.config, Some(ConfigSource::Text("config.json".to_string())));
    }

    #[test]
    fn test_invalid_params_json() {
        let cli = Cli {
            params: Some("{oops".to_string()),
            ..Cli::default()
        };
        assert!(run_args(&cli).is_err());
    }

    #[test]
    fn test_cli_request_uses_stdin() {
        let input = request_from_env(&Cli::default(), &vars(&[]), Some("{\"a\":1}".to_string()));
        assert!(input.is_cli());
        assert_eq!(input.stdin(), "{\"a\":1}");
        assert_eq!(input.path(), "::cli");
        assert_eq!(input.method(), Some("POST"));
    }

    #[test]
    fn test_cli_method_override() {
        let cli = Cli {
            method: Some("get".to_string()),
            ..Cli::default()
        };
        let input = request_from_env(&cli, &vars(&[]), None);
        assert_eq!(input.method(), Some("GET"));
        assert!(input.is_cli());
    }

    #[test]
    fn test_cgi_request() {
        let env = vars(&[
            ("REQUEST_METHOD", "GET"),
            ("REQUEST_URI", "/Users/"),
            ("QUERY_STRING", "page=3"),
            ("HTTP_SPRYTEST", "1"),
            ("HTTP_X_REQUESTED_WITH", "fetch"),
        ]);
        let input = request_from_env(&Cli::default(), &env, None);
        assert!(!input.is_cli());
        assert_eq!(input.path(), "/users/");
        assert_eq!(input.query()["page"], "3");
        assert_eq!(input.header("x-requested-with"), Some("fetch"));
        assert!(input.is_test());
    }

    #[test]
    fn test_cgi_form_body() {
        let env = vars(&[
            ("REQUEST_METHOD", "POST"),
            ("REQUEST_URI", "/form/"),
            ("CONTENT_TYPE", "application/x-www-form-urlencoded"),
        ]);
        let input = request_from_env(&Cli::default(), &env, Some("name=bob".to_string()));
        assert_eq!(input.form()["name"], "bob");
        assert_eq!(input.body_str(), "");
    }

    #[test]
    fn test_write_output_modes() {
        let output = Output {
            headers: vec!["Access-Control-Allow-Origin: *".to_string()],
            body: "{}".to_string(),
        };

        let mut plain = Vec::new();
        write_output(&output, false, &mut plain).unwrap();
        assert_eq!(String::from_utf8(plain).unwrap(), "{}\n");

        let mut cgi = Vec::new();
        write_output(&output, true, &mut cgi).unwrap();
        assert_eq!(
            String::from_utf8(cgi).unwrap(),
            "Access-Control-Allow-Origin: *\nContent-Type: application/json\n\n{}"
        );
    }

    #[test]
    fn test_end_to_end_with_callable() {
        let mut ctx = RequestContext::new();
        let hello = ctx.callable(|_, args| Ok(json!({"echo": args.params()})));
        let cli = Cli {
            config: Some(r#"{"salt":"s"}"#.to_string()),
            params: Some(r#"{"x":1}"#.to_string()),
            ..Cli::default()
        };
        let args = run_args(&cli).unwrap().controller(hello);
        let output = ctx.run(args, request_from_env(&cli, &vars(&[]), None));
        let body = output.json().unwrap();
        assert_eq!(body["code"], "0-200");
        assert_eq!(body["body"]["echo"], json!({"x": 1}));
    }
}
