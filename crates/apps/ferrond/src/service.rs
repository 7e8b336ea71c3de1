//! Built-in sample services: a greeting, an echo, and small arithmetic.

use std::sync::Arc;

use ferron_rpc::{Registry, RpcError, ServiceHandler};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct ArithArgs {
    pub a: i64,
    pub b: i64,
}

pub fn builtin_registry() -> Result<Arc<Registry>, RpcError> {
    let registry = Registry::new();
    registry.register(
        "Hello",
        ServiceHandler::new().method("Hello", |name: String| Ok::<_, String>(format!("Hello {name}"))),
    )?;
    registry.register(
        "Echo",
        ServiceHandler::new().method("Echo", |s: String| Ok::<_, String>(format!("{s}{s}"))),
    )?;
    registry.register(
        "Arith",
        ServiceHandler::new()
            .method("Add", |args: ArithArgs| Ok::<_, String>(args.a + args.b))
            .method("Div", |args: ArithArgs| {
                if args.b == 0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(args.a / args.b)
                }
            }),
    )?;
    Ok(Arc::new(registry))
}

#[cfg(test)]
mod tests {
    use super::builtin_registry;
    use serde_json::json;

    #[test]
    fn builtin_services_register_and_dispatch() {
        let registry = builtin_registry().expect("register builtins");
        assert_eq!(
            registry.dispatch("Hello.Hello", json!("world")).expect("hello"),
            json!("Hello world")
        );
        assert_eq!(
            registry.dispatch("Arith.Add", json!({"a": 2, "b": 40})).expect("add"),
            json!(42)
        );
        assert!(registry.dispatch("Arith.Div", json!({"a": 1, "b": 0})).is_err());
    }
}
