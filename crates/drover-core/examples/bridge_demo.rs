//! Worker bridge demonstration
//!
//! Drives a real worker process end to end: spawn and handshake, tool
//! discovery, one browser context, one tool call, clean shutdown.
//!
//! Usage: cargo run --example bridge_demo -- <worker-command> [args...]

use drover_core::{BridgeConfig, BridgeResult, WorkerBridge};
use serde_json::json;

#[tokio::main]
async fn main() -> BridgeResult<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let Some(command) = args.next() else {
        eprintln!("usage: bridge_demo <worker-command> [args...]");
        std::process::exit(2);
    };

    println!("🚀 Worker Bridge Demo");
    println!("=====================\n");

    let mut config = BridgeConfig::new(command);
    for arg in args {
        config = config.with_arg(arg);
    }

    let bridge = WorkerBridge::new(config);

    println!("📋 1. Starting worker and running the handshake");
    bridge.start().await?;
    println!("   state: {:?}", bridge.state());

    println!("\n🔧 2. Discovering tools");
    let tools = bridge.list_tools().await?;
    for tool in &tools {
        println!("   • {}", tool.name);
    }

    println!("\n🌐 3. Creating a browser context");
    let context = bridge.create_context(false, "demo-run").await?;
    println!("   created: {context}");

    println!("\n🖱️  4. Calling a tool");
    match bridge
        .call_tool("browser_navigate", json!({ "url": "https://example.com" }))
        .await
    {
        Ok(result) => println!("   result: {result}"),
        Err(e) => println!("   tool call failed: {e}"),
    }

    println!("\n🧹 5. Closing the context and shutting down");
    bridge.close_context().await?;
    bridge.close().await?;

    println!("\n🎉 Demo completed!");
    Ok(())
}
