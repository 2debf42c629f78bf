//! CLI commands and their execution against a client
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};

use japi::client::{ApiClient, FetchOptions, Invalidate, MutateOptions};
use japi::query::{parse_query_string, QueryArg, Segment};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Fetch a resource or collection
  Get {
    /// Request path, e.g. `todos/1` or `todos?sort=-created`
    path: String,
    /// Extra query parameter as key=value (repeatable)
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
    /// Ignore any cached copy
    #[arg(short, long)]
    force: bool,
  },
  /// Create a resource with POST
  Create {
    path: String,
    /// Flat JSON object of attributes and relationships
    #[arg(short, long)]
    data: String,
  },
  /// Update a resource with PATCH
  Update {
    path: String,
    #[arg(short, long)]
    data: String,
    /// Skip invalidating cached queries
    #[arg(long)]
    no_invalidate: bool,
  },
  /// Delete a resource
  Delete { path: String },
  /// Manage the persisted cache
  Snapshot {
    #[command(subcommand)]
    action: SnapshotAction,
  },
}

#[derive(Subcommand, Debug)]
pub enum SnapshotAction {
  /// List the cached query keys
  List,
  /// Remove every persisted document
  Clear,
}

/// Run a request command and return the normalized document.
pub async fn execute(client: &ApiClient, command: Command) -> Result<Value> {
  let result = match command {
    Command::Get {
      path,
      params,
      force,
    } => {
      let arg = query_arg(&path, &params)?;
      let options = FetchOptions {
        force,
        ..FetchOptions::default()
      };
      client.fetch(arg, options).await
    }
    Command::Create { path, data } => {
      let payload = parse_data(&data)?;
      client
        .mutate(path, Some(payload), MutateOptions::default())
        .await
    }
    Command::Update {
      path,
      data,
      no_invalidate,
    } => {
      let payload = parse_data(&data)?;
      let options = MutateOptions::default().invalidate(if no_invalidate {
        Invalidate::Disabled
      } else {
        Invalidate::Inferred
      });
      client.mutate(path, Some(payload), options).await
    }
    Command::Delete { path } => client.delete(path, MutateOptions::default()).await,
    Command::Snapshot { .. } => return Err(eyre!("Snapshot commands do not send requests")),
  };

  Ok(result)
}

/// Combine a path with `key=value` parameters into a query argument.
pub fn query_arg(path: &str, params: &[String]) -> Result<QueryArg> {
  if params.is_empty() {
    return Ok(QueryArg::from(path));
  }

  for param in params {
    if !param.contains('=') {
      return Err(eyre!("Invalid parameter '{}': expected KEY=VALUE", param));
    }
  }

  let map: Map<String, Value> = parse_query_string(&params.join("&"));
  Ok(QueryArg::Segments(vec![
    Segment::from(path),
    Segment::Params(map),
  ]))
}

fn parse_data(data: &str) -> Result<Value> {
  let value: Value =
    serde_json::from_str(data).map_err(|e| eyre!("Failed to parse --data as JSON: {}", e))?;
  if !value.is_object() {
    return Err(eyre!("--data must be a JSON object"));
  }
  Ok(value)
}

#[cfg(test)]
mod tests {
  use super::*;
  use japi::query::parse_query_arg;
  use serde_json::json;

  #[test]
  fn test_query_arg_without_params() {
    assert_eq!(query_arg("todos/1", &[]).unwrap(), QueryArg::from("todos/1"));
  }

  #[test]
  fn test_query_arg_with_params() {
    let params = vec!["include=user,comments".to_string(), "page[size]=5".to_string()];
    let arg = query_arg("todos", &params).unwrap();
    let descriptor = parse_query_arg(&arg);
    assert_eq!(
      descriptor.url.as_deref(),
      Some("/todos?include=user,comments&page[size]=5")
    );
  }

  #[test]
  fn test_query_arg_rejects_bare_param() {
    assert!(query_arg("todos", &["include".to_string()]).is_err());
  }

  #[test]
  fn test_parse_data() {
    assert_eq!(parse_data(r#"{"title":"a"}"#).unwrap(), json!({ "title": "a" }));
    assert!(parse_data("[1]").is_err());
    assert!(parse_data("{").is_err());
  }
}
