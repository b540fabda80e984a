//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `canvas_core` linkage against the SQLite field store.
//! - Exercise delegation, aliasing and undo with deterministic output.

use canvas_core::keys::{TITLE, WIDTH};
use canvas_core::{CoreConfig, DocGraph, SqliteTransport};
use log::info;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let config = CoreConfig::from_env()?;
    canvas_core::init_from_config(&config)?;
    println!("canvas_core version={}", canvas_core::core_version());

    let transport = match config.store_path.as_deref() {
        Some(path) => SqliteTransport::open(path)?,
        None => SqliteTransport::open_in_memory()?,
    };
    let mut graph = DocGraph::with_config(transport, &config);

    let prototype = graph.new_document();
    graph.set_text(prototype, &TITLE, "Image")?;
    graph.set_number(prototype, &WIDTH, 300.0)?;

    let delegate = graph.make_delegate(prototype);
    let alias = graph.create_alias(delegate)?;
    println!(
        "delegate title={} width={}",
        graph.title(delegate),
        graph.get_number(delegate, &WIDTH, 0.0)
    );

    graph.set_text(alias, &TITLE, "Alias")?;
    println!("alias title={} delegate title={}", graph.title(alias), graph.title(delegate));

    graph.undo();
    println!("after undo alias title={}", graph.title(alias));

    let pumped = graph.pump();
    let stats = graph.gateway().stats();
    info!(
        "event=cli_smoke module=cli status=ok pumped={} pushes={}",
        pumped, stats.pushes
    );
    println!("pushes={}", stats.pushes);
    Ok(())
}
