//! Placeholder views and the persisted data-attribute layout.
//!
//! A placeholder is persisted as
//! `<div class="skn-file-upload-placeholder" data-file-uid=.. ...>`. Reading
//! such a block back without `data-file-path` yields a pending placeholder.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tracing::debug;

use crate::document::{DocumentTree, NewElement, NodeKey, RootKind};
use crate::error::RenderError;
use crate::upload::{PlaceholderAttributes, ProgressEntry, UploadPhase, UploadedBy, PLACEHOLDER_ELEMENT};
use crate::utils::color::contrasting_text;
use crate::utils::time::distance_to_now;

pub const PLACEHOLDER_CLASS: &str = "skn-file-upload-placeholder";

pub const DATA_FILE_UID: &str = "data-file-uid";
pub const DATA_FILE_PATH: &str = "data-file-path";
pub const DATA_FILE_NAME: &str = "data-file-name";
pub const DATA_FILE_SIZE: &str = "data-file-size";
pub const DATA_UPLOADED_AT: &str = "data-uploaded-at";
pub const DATA_UPLOADED_BY: &str = "data-uploaded-by";
pub const DATA_UPLOADED_BY_ID: &str = "data-uploaded-by-id";
pub const DATA_UPLOADED_BY_COLOR: &str = "data-uploaded-by-color";

pub fn to_data_attributes(attrs: &PlaceholderAttributes) -> Vec<(&'static str, String)> {
    vec![
        (DATA_FILE_UID, attrs.file_uid.clone()),
        (DATA_FILE_PATH, attrs.file_path.clone()),
        (DATA_FILE_NAME, attrs.file_name.clone()),
        (DATA_FILE_SIZE, attrs.file_size.clone()),
        (DATA_UPLOADED_AT, attrs.uploaded_at.clone()),
        (DATA_UPLOADED_BY, attrs.uploaded_by.name.clone()),
        (DATA_UPLOADED_BY_ID, attrs.uploaded_by.id.clone()),
        (DATA_UPLOADED_BY_COLOR, attrs.uploaded_by.color.clone()),
    ]
}

pub fn from_data_attributes(data: &BTreeMap<String, String>) -> Option<PlaceholderAttributes> {
    let get = |name: &str| data.get(name).cloned().unwrap_or_default();
    let file_uid = data.get(DATA_FILE_UID).filter(|v| !v.is_empty())?.clone();

    Some(PlaceholderAttributes {
        file_uid,
        file_path: get(DATA_FILE_PATH),
        file_name: get(DATA_FILE_NAME),
        file_size: get(DATA_FILE_SIZE),
        uploaded_at: get(DATA_UPLOADED_AT),
        uploaded_by: UploadedBy {
            name: get(DATA_UPLOADED_BY),
            id: get(DATA_UPLOADED_BY_ID),
            color: get(DATA_UPLOADED_BY_COLOR),
        },
    })
}

/// Model element for a persisted placeholder block.
pub fn upcast(data: &BTreeMap<String, String>) -> Option<NewElement> {
    let attrs = from_data_attributes(data)?;
    Some(NewElement::new(PLACEHOLDER_ELEMENT).with_attributes(attrs.to_model()))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avatar {
    pub initial: String,
    pub background: String,
    pub foreground: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub avatar: Option<Avatar>,
    pub description: String,
}

impl FileInfo {
    fn from_attributes(attrs: &PlaceholderAttributes) -> Self {
        let user = &attrs.uploaded_by;
        let avatar = (!user.color.is_empty()).then(|| Avatar {
            initial: user.name.chars().next().map(String::from).unwrap_or_default(),
            background: user.color.clone(),
            foreground: contrasting_text(&user.color),
        });

        let mut description = format!("Uploaded by {}", user.name);
        if let Some(ago) = distance_to_now(&attrs.uploaded_at, Utc::now()) {
            description.push_str(&format!(" {} ago", ago));
        }
        Self {
            avatar,
            description,
        }
    }

    fn to_html(&self) -> String {
        let avatar = self
            .avatar
            .as_ref()
            .map(|a| {
                format!(
                    r#"<div class="{cls}__file_info__avatar" style="background: {}; color: {}">{}</div>"#,
                    escape(&a.background),
                    a.foreground,
                    escape(&a.initial),
                    cls = PLACEHOLDER_CLASS,
                )
            })
            .unwrap_or_default();
        format!(
            r#"<div class="{cls}__file_info">{}<div class="{cls}__file_info__desc">{}</div></div>"#,
            avatar,
            escape(&self.description),
            cls = PLACEHOLDER_CLASS,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewBody {
    Completed(FileInfo),
    /// Percent text with one decimal, empty until the first tick.
    Uploading { percent: String },
    Pending,
}

/// Editing view of one placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderView {
    pub file_uid: String,
    pub title: String,
    pub body: ViewBody,
}

impl PlaceholderView {
    pub fn editing(attrs: &PlaceholderAttributes, progress: Option<&ProgressEntry>) -> Self {
        let body = if attrs.is_completed() {
            ViewBody::Completed(FileInfo::from_attributes(attrs))
        } else {
            match progress {
                Some(entry) if entry.status == Some(UploadPhase::Uploading) => ViewBody::Uploading {
                    percent: entry.percent_text(),
                },
                _ => ViewBody::Pending,
            }
        };

        Self {
            file_uid: attrs.file_uid.clone(),
            title: format!("{} ({})", attrs.file_name, attrs.file_size),
            body,
        }
    }
}

/// Serialized data view of a placeholder, as stored by the host.
pub fn data_html(attrs: &PlaceholderAttributes) -> String {
    let data: String = to_data_attributes(attrs)
        .into_iter()
        .map(|(name, value)| format!(r#" {}="{}""#, name, escape(&value)))
        .collect();
    let title = escape(&format!("{} ({})", attrs.file_name, attrs.file_size));
    let info = FileInfo::from_attributes(attrs).to_html();

    format!(
        r#"<div class="{cls}"{data}><div class="{cls}__title-container"><div class="{cls}__title">{title}</div><a href="{href}" download="{name}" target="_blank" class="{cls}__link"></a></div>{info}</div>"#,
        cls = PLACEHOLDER_CLASS,
        data = data,
        title = title,
        href = escape(&attrs.file_path),
        name = escape(&attrs.file_name),
        info = info,
    )
}

/// Data view of every placeholder in the main root, in document order.
pub fn document_data_html(document: &dyn DocumentTree) -> String {
    document
        .nodes_in(RootKind::Main)
        .into_iter()
        .filter(|key| document.name(*key) == Some(PLACEHOLDER_ELEMENT))
        .filter_map(|key| document.attributes(key).and_then(PlaceholderAttributes::from_model))
        .map(|attrs| data_html(&attrs))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Refreshes a node's view outside the document's change tracking.
pub trait NodeRenderer {
    fn rerender(
        &self,
        document: &dyn DocumentTree,
        node: NodeKey,
        progress: Option<&ProgressEntry>,
    ) -> Result<(), RenderError>;

    /// Drop whatever is kept for a node that left the document for good.
    fn forget(&self, _node: NodeKey) {}
}

/// Keeps the latest editing view of every rendered placeholder.
#[derive(Debug, Default)]
pub struct ViewRenderer {
    views: RefCell<HashMap<NodeKey, PlaceholderView>>,
    renders: Cell<usize>,
}

impl ViewRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self, node: NodeKey) -> Option<PlaceholderView> {
        self.views.borrow().get(&node).cloned()
    }

    pub fn render_count(&self) -> usize {
        self.renders.get()
    }
}

impl NodeRenderer for ViewRenderer {
    fn rerender(
        &self,
        document: &dyn DocumentTree,
        node: NodeKey,
        progress: Option<&ProgressEntry>,
    ) -> Result<(), RenderError> {
        let attrs = document
            .attributes(node)
            .and_then(PlaceholderAttributes::from_model);
        let Some(attrs) = attrs else {
            self.views.borrow_mut().remove(&node);
            return Err(RenderError::NodeMissing(node));
        };

        let view = PlaceholderView::editing(&attrs, progress);
        debug!("Rendered placeholder {}: {:?}", attrs.file_uid, view.body);
        let mut views = self.views.borrow_mut();
        views.retain(|key, _| document.contains(*key));
        views.insert(node, view);
        self.renders.set(self.renders.get() + 1);
        Ok(())
    }

    fn forget(&self, node: NodeKey) {
        self.views.borrow_mut().remove(&node);
    }
}

/// Toolbar shown next to a selected, completed placeholder.
pub trait ContextualToolbar {
    fn show(&self, node: NodeKey);
    fn hide(&self);
}

/// Remembers which node the toolbar is attached to.
#[derive(Debug, Default)]
pub struct ToolbarState {
    target: Cell<Option<NodeKey>>,
}

impl ToolbarState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self) -> Option<NodeKey> {
        self.target.get()
    }
}

impl ContextualToolbar for ToolbarState {
    fn show(&self, node: NodeKey) {
        self.target.set(Some(node));
    }

    fn hide(&self) {
        self.target.set(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentHandle, MemoryDocument, MutationBatch, Position};

    fn attrs() -> PlaceholderAttributes {
        PlaceholderAttributes {
            file_uid: "u1".into(),
            file_path: "/f/a".into(),
            file_name: "a&b.txt".into(),
            file_size: "2 MB".into(),
            uploaded_at: Utc::now().to_rfc3339(),
            uploaded_by: UploadedBy {
                name: "Ada".into(),
                id: "7".into(),
                color: "#000080".into(),
            },
        }
    }

    #[test]
    fn test_data_attributes_round_trip() {
        let original = attrs();
        let data: BTreeMap<String, String> = to_data_attributes(&original)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(from_data_attributes(&data), Some(original));
    }

    #[test]
    fn test_block_without_path_is_pending() {
        let mut data = BTreeMap::new();
        data.insert(DATA_FILE_UID.to_string(), "u1".to_string());
        data.insert(DATA_FILE_NAME.to_string(), "a.txt".to_string());

        let attrs = from_data_attributes(&data).unwrap();
        assert!(!attrs.is_completed());

        let element = upcast(&data).unwrap();
        assert_eq!(element.name, PLACEHOLDER_ELEMENT);
        assert_eq!(element.attributes.get("filePath").map(String::as_str), Some(""));
    }

    #[test]
    fn test_editing_view_bodies() {
        let mut pending = attrs();
        pending.file_path.clear();

        assert_eq!(PlaceholderView::editing(&pending, None).body, ViewBody::Pending);

        let uploading = ProgressEntry {
            percent: Some(42.5),
            status: Some(UploadPhase::Uploading),
        };
        assert_eq!(
            PlaceholderView::editing(&pending, Some(&uploading)).body,
            ViewBody::Uploading {
                percent: "42.5%".into()
            }
        );

        let view = PlaceholderView::editing(&attrs(), Some(&uploading));
        assert_eq!(view.title, "a&b.txt (2 MB)");
        match view.body {
            ViewBody::Completed(info) => {
                let avatar = info.avatar.unwrap();
                assert_eq!(avatar.initial, "A");
                assert_eq!(avatar.foreground, "#ffffff");
                assert_eq!(info.description, "Uploaded by Ada less than a minute ago");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_data_html_escapes_values() {
        let html = data_html(&attrs());
        assert!(html.starts_with(r#"<div class="skn-file-upload-placeholder" data-file-uid="u1""#));
        assert!(html.contains(r#"data-file-name="a&amp;b.txt""#));
        assert!(html.contains(r#"href="/f/a""#));
    }

    #[test]
    fn test_rerender_missing_node_fails() {
        let doc = DocumentHandle::new(MemoryDocument::new());
        let key = doc
            .change(MutationBatch::new().insert(
                NewElement::new(PLACEHOLDER_ELEMENT).with_attributes(attrs().to_model()),
                Position::end_of_main(),
            ))
            .unwrap()
            .unwrap()
            .created[0];
        let renderer = ViewRenderer::new();

        renderer.rerender(&*doc.read(), key, None).unwrap();
        assert!(renderer.view(key).is_some());

        doc.change(MutationBatch::new().purge(key)).unwrap();
        let err = renderer.rerender(&*doc.read(), key, None).unwrap_err();
        assert_eq!(err, RenderError::NodeMissing(key));
        assert_eq!(renderer.render_count(), 1);
    }

    #[test]
    fn test_views_of_purged_nodes_are_dropped() {
        let doc = DocumentHandle::new(MemoryDocument::new());
        let insert = || {
            doc.change(MutationBatch::new().insert(
                NewElement::new(PLACEHOLDER_ELEMENT).with_attributes(attrs().to_model()),
                Position::end_of_main(),
            ))
            .unwrap()
            .unwrap()
            .created[0]
        };
        let (a, b, c) = (insert(), insert(), insert());
        let renderer = ViewRenderer::new();
        for key in [a, b, c] {
            renderer.rerender(&*doc.read(), key, None).unwrap();
        }

        // Purged without a later render of its own.
        doc.change(MutationBatch::non_undoable().purge(a)).unwrap();
        renderer.rerender(&*doc.read(), b, None).unwrap();
        assert!(renderer.view(a).is_none());
        assert!(renderer.view(b).is_some());

        renderer.forget(c);
        assert!(renderer.view(c).is_none());
    }
}
