use dioxus::prelude::*;

use super::render_document;

/// One published map as shown on a domain's catalog page.
#[derive(Clone, PartialEq)]
pub struct CatalogEntryView {
    pub label: String,
    pub title: String,
    pub map_id: String,
    pub map_version_id: i64,
    /// Empty when the entry has no publisher name.
    pub publisher_name: String,
    pub updated: String,
    pub is_listed: bool,
}

#[allow(non_snake_case)]
#[component]
fn CatalogPage(domain: String, user_domain: Option<String>, entries: Vec<CatalogEntryView>) -> Element {
    let full_title = format!("Published maps for {domain}");
    let signed_in = user_domain
        .map(|d| format!("Signed in from {d}"))
        .unwrap_or_default();
    rsx! {
        head {
            meta { charset: "utf-8" }
            meta { name: "viewport", content: "width=device-width, initial-scale=1" }
            title { "{full_title}" }
        }
        body { style: "font-family:sans-serif;margin:24px;",
            h2 { "{full_title}" }
            if !signed_in.is_empty() {
                p { style: "font-size:13px;color:#888;", "{signed_in}" }
            }
            if entries.is_empty() {
                p { style: "color:#888;", "No maps have been published in this domain." }
            } else {
                form { method: "POST", action: "/crisismap/a/{domain}/.catalog",
                    table { style: "border-collapse:collapse;font-size:14px;",
                        thead {
                            tr {
                                th { style: "text-align:left;padding:4px 12px;", "Label" }
                                th { style: "text-align:left;padding:4px 12px;", "Title" }
                                th { style: "text-align:left;padding:4px 12px;", "Version" }
                                th { style: "text-align:left;padding:4px 12px;", "Publisher" }
                                th { style: "text-align:left;padding:4px 12px;", "Updated" }
                                th { style: "text-align:center;padding:4px 12px;", "Listed in map picker" }
                            }
                        }
                        tbody {
                            for entry in entries.iter() {
                                tr {
                                    td { style: "padding:4px 12px;",
                                        a { href: "/crisismap/a/{domain}/{entry.label}", "{entry.label}" }
                                    }
                                    td { style: "padding:4px 12px;", "{entry.title}" }
                                    td { style: "padding:4px 12px;color:#888;", "{entry.map_id}@{entry.map_version_id}" }
                                    td { style: "padding:4px 12px;", "{entry.publisher_name}" }
                                    td { style: "padding:4px 12px;color:#888;", "{entry.updated}" }
                                    td { style: "text-align:center;padding:4px 12px;",
                                        input {
                                            r#type: "checkbox",
                                            name: "{entry.label}",
                                            value: "on",
                                            checked: entry.is_listed,
                                        }
                                    }
                                }
                            }
                        }
                    }
                    button { r#type: "submit", style: "margin-top:12px;", "Save" }
                }
            }
        }
    }
}

pub fn render_catalog(
    domain: String,
    user_domain: Option<String>,
    entries: Vec<CatalogEntryView>,
) -> String {
    let mut dom = VirtualDom::new_with_props(
        CatalogPage,
        CatalogPageProps {
            domain,
            user_domain,
            entries,
        },
    );
    dom.rebuild_in_place();
    render_document(&dom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_entries_with_listing_form() {
        let html = render_catalog(
            "xyz.com".into(),
            None,
            vec![CatalogEntryView {
                label: "floods".into(),
                title: "Flood Map".into(),
                map_id: "m1".into(),
                map_version_id: 3,
                publisher_name: "Relief Org".into(),
                updated: "2024-01-02 03:04 UTC".into(),
                is_listed: true,
            }],
        );
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("Flood Map"));
        assert!(html.contains("m1@3"));
        assert!(html.contains("/crisismap/a/xyz.com/.catalog"));
        assert!(html.contains("Relief Org"));
    }

    #[test]
    fn empty_catalog_says_so() {
        let html = render_catalog("xyz.com".into(), Some("xyz.com".into()), Vec::new());
        assert!(html.contains("No maps have been published"));
        assert!(!html.contains("<form"));
    }
}
