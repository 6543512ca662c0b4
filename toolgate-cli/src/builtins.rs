//! Native tools the console installs next to catalog tools.

use serde_json::Value;
use toolgate::governor::{Governance, GovernanceResult};
use toolgate::primitives::ScopeId;
use toolgate::tools::{ToolError, ToolMetadata, ToolResult};

/// Installs `read_file`, gated by `filesystem.read` in addition to its own
/// tool scope.
pub fn install(governance: &Governance) -> GovernanceResult<()> {
    let metadata = ToolMetadata::new("read_file")?
        .with_description("Read a UTF-8 text file and return its contents")
        .with_required_scopes(vec![ScopeId::new("filesystem.read")?]);
    governance.install_builtin(metadata, read_file)
}

async fn read_file(input: Value) -> ToolResult<Value> {
    let path = match &input {
        Value::String(path) => path.as_str(),
        Value::Object(map) => map
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::invalid_arguments("missing string argument `path`"))?,
        _ => return Err(ToolError::invalid_arguments("expected a path")),
    };

    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| ToolError::execution(format!("{path}: {err}")))?;
    Ok(Value::String(contents))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn reads_by_bare_path_or_object() {
        let path = std::env::temp_dir().join(format!("toolgate-read-{}.txt", Uuid::new_v4()));
        tokio::fs::write(&path, "hello").await.unwrap();
        let path_str = path.display().to_string();

        assert_eq!(read_file(json!(path_str)).await.unwrap(), json!("hello"));
        assert_eq!(
            read_file(json!({ "path": path_str })).await.unwrap(),
            json!("hello")
        );
        assert!(matches!(
            read_file(json!(3)).await,
            Err(ToolError::InvalidArguments { .. })
        ));
        let _ = tokio::fs::remove_file(path).await;
        assert!(matches!(
            read_file(json!(path_str)).await,
            Err(ToolError::Execution { .. })
        ));
    }
}
