//! Subcommand implementations.

use anyhow::{bail, Context};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use voxkit_kernel::agent_manager::contract::{field, function};
use voxkit_kernel::agent_manager::SERVICE_NAME;
use voxkit_kernel::Kernel;
use voxkit_types::config::RuntimeConfig;
use voxkit_types::schema::FunctionResult;
use voxkit_types::value::{TypedValue, ValueMap};

use crate::loopback::{self, LoopbackBackend};

pub fn cmd_config(config: &RuntimeConfig) -> anyhow::Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render config")?;
    print!("{rendered}");
    Ok(())
}

pub async fn cmd_schemas(config: RuntimeConfig, as_json: bool) -> anyhow::Result<()> {
    let kernel = Kernel::boot(config)?;
    let registry = kernel.registry();

    let mut services = serde_json::Map::new();
    for name in registry.names() {
        let functions = registry.function_schemas(&name)?;
        let events = registry.event_schemas(&name)?;
        if as_json {
            services.insert(name, json!({ "functions": functions, "events": events }));
            continue;
        }

        println!("{name}");
        println!("  functions:");
        for f in &functions {
            let params: Vec<String> = f
                .parameters
                .iter()
                .map(|p| {
                    let marker = if p.is_required() { "" } else { "?" };
                    format!("{}{marker}: {}", p.name, p.value_type)
                })
                .collect();
            let scheduled = if f.require_scheduling { " [scheduled]" } else { "" };
            println!("    {}({}){scheduled}  {}", f.name, params.join(", "), f.description);
        }
        println!("  events:");
        for e in &events {
            let items: Vec<String> = e
                .items
                .iter()
                .map(|i| format!("{}: {}", i.name, i.value_type))
                .collect();
            println!("    {} {{{}}}  {}", e.name, items.join(", "), e.description);
        }
    }
    if as_json {
        println!("{}", serde_json::to_string_pretty(&services)?);
    }

    kernel.shutdown().await;
    Ok(())
}

/// Steps of the scripted demo: function name plus its single parameter.
fn demo_script(manual: bool) -> Vec<(&'static str, Option<(&'static str, TypedValue)>)> {
    let action = |a: &str| Some((field::ACTION, TypedValue::from(a)));
    let mut steps = vec![(
        function::ACTIVATE_AGENT,
        Some((field::NAME, TypedValue::from(loopback::NAME))),
    )];
    if manual {
        steps.push((function::SET_CHAT_MODE, Some((field::MODE, TypedValue::from("Manual")))));
    }
    steps.push((function::TRIGGER_GENERAL_ACTION, action("Activate")));
    steps.push((function::TRIGGER_GENERAL_ACTION, action("Start")));
    if manual {
        steps.push((function::MANUAL_START_LISTENING, None));
        steps.push((function::MANUAL_STOP_LISTENING, None));
    }
    steps.push((function::INTERRUPT_SPEAKING, None));
    steps.push((function::TRIGGER_GENERAL_ACTION, action("Sleep")));
    steps.push((function::TRIGGER_GENERAL_ACTION, action("WakeUp")));
    steps.push((function::SUSPEND, None));
    steps.push((function::RESUME, None));
    steps.push((function::TRIGGER_GENERAL_ACTION, action("Stop")));
    steps.push((function::GET_GENERAL_STATE, None));
    steps
}

fn describe(result: &FunctionResult) -> String {
    match (&result.data, &result.error_kind) {
        (_, Some(kind)) => format!(
            "error {kind}: {}",
            result.error_message.as_deref().unwrap_or("")
        ),
        (Some(data), None) => format!("ok {}", data.to_json()),
        (None, None) => "ok".to_string(),
    }
}

pub async fn cmd_demo(config: RuntimeConfig, manual: bool) -> anyhow::Result<()> {
    let kernel = Kernel::boot(config)?;
    let manager = kernel.agent_manager();
    manager.register_agent(LoopbackBackend::attributes(), Arc::new(LoopbackBackend::default()));

    let mut events = kernel.registry().subscribe_all(SERVICE_NAME)?;
    let printer = tokio::spawn(async move {
        while let Some(occ) = events.recv().await {
            let items = serde_json::to_string(&occ.items).unwrap_or_default();
            println!(
                "  event {} {}.{} {items}",
                occ.timestamp.format("%H:%M:%S%.3f"),
                occ.service,
                occ.event
            );
        }
    });

    let registry = kernel.registry();
    let mut failed = 0usize;
    for (name, param) in demo_script(manual) {
        let mut params = ValueMap::new();
        if let Some((key, value)) = param {
            params.insert(key.to_string(), value);
        }
        let shown = params
            .values()
            .next()
            .map(|v| v.to_json().to_string())
            .unwrap_or_default();
        let result = registry.call(SERVICE_NAME, name, params).await;
        println!("{name}({shown}) -> {}", describe(&result));
        if !result.success {
            failed += 1;
        }
        // Let the printer catch up so output stays in call order.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    kernel.shutdown().await;
    printer.abort();
    if failed > 0 {
        bail!("{failed} demo step(s) failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_script_shapes() {
        let plain = demo_script(false);
        let manual = demo_script(true);
        assert_eq!(plain.first().map(|s| s.0), Some(function::ACTIVATE_AGENT));
        assert_eq!(plain.last().map(|s| s.0), Some(function::GET_GENERAL_STATE));
        assert!(manual.iter().any(|s| s.0 == function::MANUAL_START_LISTENING));
        assert!(!plain.iter().any(|s| s.0 == function::SET_CHAT_MODE));
        assert_eq!(manual.len(), plain.len() + 3);
    }

    #[test]
    fn test_describe_result() {
        assert_eq!(describe(&FunctionResult::ok()), "ok");
        assert_eq!(describe(&FunctionResult::with_data("Ready")), "ok \"Ready\"");
    }

    #[tokio::test]
    async fn test_demo_runs_clean() {
        let mut config = RuntimeConfig::default();
        config.scheduler.poll_interval_ms = 5;
        cmd_demo(config.clone(), false).await.unwrap();
        cmd_demo(config, true).await.unwrap();
    }
}
