use anyhow::anyhow;
use process_assist::{Assist, MethodRegistry, Namespace};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

/// Methods the child exposes to its parent.
pub fn registry() -> MethodRegistry {
    MethodRegistry::new(
        Namespace::new()
            .method_sync("test", |_, args| {
                let info = match args.first() {
                    Some(Value::String(text)) => text.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Ok(json!(format!("test method result {}", info)))
            })
            .method("slow", |_, args| async move {
                let millis = args.first().and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(json!(millis))
            })
            .namespace("math", Namespace::new().method_sync("add", |_, args| add(&args))),
    )
}

fn add(args: &[Value]) -> anyhow::Result<Value> {
    let operand = |index: usize| {
        args.get(index)
            .filter(|value| value.is_number())
            .ok_or_else(|| anyhow!("math.add: argument {} is not a number", index + 1))
    };
    let (a, b) = (operand(0)?, operand(1)?);

    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(json!(sum));
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => Ok(json!(a + b)),
        _ => Err(anyhow!("math.add: operands out of range")),
    }
}

/// Serves the parent until it closes the channel.
pub async fn run() -> anyhow::Result<()> {
    info!("Worker {} serving on stdio", std::process::id());
    let parent = Assist::new(registry()).serve_stdio();
    parent.closed().await;
    info!("Parent closed the channel, exiting");
    Ok(())
}
