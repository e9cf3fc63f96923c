use dioxus::prelude::VirtualDom;

pub mod catalog;

pub use catalog::{render_catalog, CatalogEntryView};

/// Wraps a rebuilt VirtualDom in a complete HTML document.
fn render_document(dom: &VirtualDom) -> String {
    format!(
        "<!DOCTYPE html><html lang=\"en\">{}</html>",
        dioxus::ssr::render(dom)
    )
}
