use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::LocalSet;

use placeholder_uploader::config::{FileUploadConfig, UploadHooks};
use placeholder_uploader::document::{
    DocumentHandle, DocumentTree, MemoryDocument, MutationBatch, NewElement, NodeKey, Position,
    RootKind, Subscription,
};
use placeholder_uploader::error::TransportError;
use placeholder_uploader::notify::Notifier;
use placeholder_uploader::upload::reconciler::scan;
use placeholder_uploader::upload::{
    attr, FileLoader, LoaderFactory, ProgressSink, SelectedFile, SessionServices, UploadAdapter,
    UploadComplete, UploadId, UploadRegistry, UploadResponse, UploadSession, UploadSummary,
    PLACEHOLDER_ELEMENT,
};
use placeholder_uploader::view::{ToolbarState, ViewRenderer};

type Gates = Rc<RefCell<HashMap<String, oneshot::Sender<Result<UploadResponse, TransportError>>>>>;

/// Adapter whose reply is released by the test, keyed by file name.
struct GatedAdapter {
    reply: RefCell<Option<oneshot::Receiver<Result<UploadResponse, TransportError>>>>,
    aborts: Rc<Cell<usize>>,
}

#[async_trait(?Send)]
impl UploadAdapter for GatedAdapter {
    async fn upload(
        &self,
        _file: &SelectedFile,
        data: Vec<u8>,
        progress: ProgressSink,
    ) -> Result<UploadResponse, TransportError> {
        progress.report(data.len() as u64 / 2, data.len() as u64);
        let reply = self.reply.borrow_mut().take();
        match reply {
            Some(reply) => reply
                .await
                .unwrap_or_else(|_| Err(TransportError::Rejected("gate dropped".into()))),
            None => Err(TransportError::Rejected("uploaded twice".into())),
        }
    }

    fn abort(&self) {
        self.aborts.set(self.aborts.get() + 1);
    }
}

#[derive(Default)]
struct Notices {
    warnings: RefCell<Vec<(String, String)>>,
    alerts: RefCell<Vec<String>>,
}

impl Notifier for Notices {
    fn show_warning(&self, message: &str, title: &str) {
        self.warnings
            .borrow_mut()
            .push((message.to_string(), title.to_string()));
    }

    fn show_alert(&self, message: &str) {
        self.alerts.borrow_mut().push(message.to_string());
    }
}

struct TestSession {
    session: UploadSession,
    gates: Gates,
    aborts: Rc<RefCell<HashMap<String, Rc<Cell<usize>>>>>,
    notices: Rc<Notices>,
    toolbar: Rc<ToolbarState>,
    completed: Rc<RefCell<Vec<UploadComplete>>>,
    _completions: Subscription,
}

impl TestSession {
    fn new() -> Self {
        let gates: Gates = Rc::default();
        let aborts: Rc<RefCell<HashMap<String, Rc<Cell<usize>>>>> = Rc::default();
        let (builder_gates, builder_aborts) = (gates.clone(), aborts.clone());
        let factory = LoaderFactory::new(Rc::new(move |file: &SelectedFile| {
            let (tx, rx) = oneshot::channel();
            builder_gates.borrow_mut().insert(file.name.clone(), tx);
            let counter = Rc::new(Cell::new(0));
            builder_aborts
                .borrow_mut()
                .insert(file.name.clone(), counter.clone());
            Box::new(GatedAdapter {
                reply: RefCell::new(Some(rx)),
                aborts: counter,
            }) as Box<dyn UploadAdapter>
        }));

        let notices = Rc::new(Notices::default());
        let toolbar = Rc::new(ToolbarState::new());
        let session = UploadSession::new(
            DocumentHandle::new(MemoryDocument::new()),
            FileUploadConfig::default(),
            UploadHooks::default(),
            Rc::new(factory),
            None,
            SessionServices {
                notifier: notices.clone(),
                renderer: Rc::new(ViewRenderer::new()),
                toolbar: toolbar.clone(),
            },
        );
        session.start();

        let completed = Rc::new(RefCell::new(Vec::new()));
        let log = completed.clone();
        let subscription = session.on_upload_complete(move |c| log.borrow_mut().push(c.clone()));

        Self {
            session,
            gates,
            aborts,
            notices,
            toolbar,
            completed,
            _completions: subscription,
        }
    }

    fn release(&self, name: &str, reply: Result<UploadResponse, TransportError>) {
        let gate = self.gates.borrow_mut().remove(name);
        if let Some(gate) = gate {
            let _ = gate.send(reply);
        }
    }

    fn aborts(&self, name: &str) -> usize {
        self.aborts.borrow().get(name).map_or(0, |count| count.get())
    }

    fn node_of(&self, id: &UploadId) -> Option<NodeKey> {
        let document = self.session.document().read();
        let found = document
            .nodes_in(RootKind::Main)
            .into_iter()
            .find(|node| document.attribute(*node, attr::FILE_UID) == Some(id.as_str()));
        found
    }

    fn file_path(&self, node: NodeKey) -> Option<String> {
        self.session
            .document()
            .read()
            .attribute(node, attr::FILE_PATH)
            .map(str::to_string)
    }
}

async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

fn text_file(dir: &tempfile::TempDir, name: &str, content: &str) -> SelectedFile {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    SelectedFile::from_path(&path, "text/plain").unwrap()
}

#[tokio::test]
async fn test_two_files_one_fails() {
    LocalSet::new()
        .run_until(async {
            let dir = tempfile::tempdir().unwrap();
            let t = TestSession::new();
            let ids = t
                .session
                .select_files(
                    vec![text_file(&dir, "a.txt", "alpha"), text_file(&dir, "b.txt", "beta")],
                    Position::end_of_main(),
                )
                .unwrap();
            settle().await;

            let a = t.node_of(&ids[0]).unwrap();
            let b = t.node_of(&ids[1]).unwrap();
            assert_eq!(t.session.pending_uploads(), 2);

            t.release("a.txt", Ok(UploadResponse::new("/files/a.txt")));
            t.release(
                "b.txt",
                Err(TransportError::Rejected("Couldn't upload file: b.txt.".into())),
            );
            t.session.wait_idle().await;

            assert_eq!(t.file_path(a).as_deref(), Some("/files/a.txt"));
            assert!(!t.session.document().read().contains(b));
            assert_eq!(
                *t.notices.warnings.borrow(),
                vec![("Couldn't upload file: b.txt.".to_string(), "Upload failed".to_string())]
            );
            assert_eq!(
                t.session.summary(),
                UploadSummary {
                    completed: 1,
                    failed: 1,
                    ..Default::default()
                }
            );
        })
        .await;
}

#[tokio::test]
async fn test_completed_upload_has_path_and_no_progress() {
    LocalSet::new()
        .run_until(async {
            let t = TestSession::new();
            let ids = t
                .session
                .select_files(
                    vec![SelectedFile::from_bytes("c.png", "image/png", vec![0; 64])],
                    Position::end_of_main(),
                )
                .unwrap();
            settle().await;

            let entry = t.session.progress(&ids[0]).unwrap();
            assert_eq!(entry.percent, Some(50.0));

            t.release("c.png", Ok(UploadResponse::new("/files/c.png")));
            t.session.wait_idle().await;

            let node = t.node_of(&ids[0]).unwrap();
            assert_eq!(t.file_path(node).as_deref(), Some("/files/c.png"));
            assert!(t.session.progress(&ids[0]).is_none());
            assert_eq!(t.session.pending_uploads(), 0);

            let completed = t.completed.borrow();
            assert_eq!(completed.len(), 1);
            assert_eq!(completed[0].node, node);
        })
        .await;
}

#[tokio::test]
async fn test_removed_placeholder_is_aborted_once() {
    LocalSet::new()
        .run_until(async {
            let t = TestSession::new();
            let ids = t
                .session
                .select_files(
                    vec![SelectedFile::from_bytes("d.txt", "text/plain", vec![1; 10])],
                    Position::end_of_main(),
                )
                .unwrap();
            settle().await;
            let node = t.node_of(&ids[0]).unwrap();

            t.session
                .document()
                .change(MutationBatch::new().remove(node))
                .unwrap();
            t.session.wait_idle().await;
            assert_eq!(t.aborts("d.txt"), 1);

            // The server answering afterwards changes nothing.
            t.release("d.txt", Ok(UploadResponse::new("/files/d.txt")));
            settle().await;
            assert_eq!(t.file_path(node), None);
            assert!(t.completed.borrow().is_empty());
            assert!(t.notices.warnings.borrow().is_empty());
            assert_eq!(t.session.summary().aborted, 1);
        })
        .await;
}

#[tokio::test]
async fn test_local_delete_without_configuration() {
    LocalSet::new()
        .run_until(async {
            let t = TestSession::new();
            let ids = t
                .session
                .select_files(
                    vec![SelectedFile::from_bytes("e.txt", "text/plain", vec![2; 10])],
                    Position::end_of_main(),
                )
                .unwrap();
            settle().await;
            t.release("e.txt", Ok(UploadResponse::new("/files/e.txt")));
            t.session.wait_idle().await;

            let node = t.node_of(&ids[0]).unwrap();
            t.session.on_selection_change(Some(node));
            assert_eq!(t.toolbar.target(), Some(node));

            t.session.delete_file(node).await.unwrap();
            assert!(!t.session.document().read().contains(node));
            assert_eq!(t.toolbar.target(), None);
            assert!(t.notices.alerts.borrow().is_empty());
        })
        .await;
}

#[test]
fn test_undo_in_one_batch_keeps_upload_running() {
    let mut document = MemoryDocument::new();
    let mut registry = UploadRegistry::new();
    let id = UploadId::new("upload-1");
    let file = SelectedFile::from_bytes("f.txt", "text/plain", vec![3; 4]);
    let adapter = Box::new(GatedAdapter {
        reply: RefCell::new(None),
        aborts: Rc::default(),
    });
    registry.register(id.clone(), Rc::new(FileLoader::new(id.clone(), file, adapter)));

    let inserted = document
        .apply(MutationBatch::new().insert(
            NewElement::new(PLACEHOLDER_ELEMENT).with_attribute(attr::FILE_UID, id.as_str()),
            Position::end_of_main(),
        ))
        .unwrap();
    let node = inserted.created[0];
    let undone = document.apply(MutationBatch::new().remove(node)).unwrap();
    let redone = document
        .apply(MutationBatch::new().move_to(node, Position::end_of_main()))
        .unwrap();

    // Insert, undo and redo reported together leave the upload alone.
    let diff: Vec<_> = inserted
        .diff
        .iter()
        .chain(&undone.diff)
        .chain(&redone.diff)
        .copied()
        .collect();
    let plan = scan(&diff, &document, &registry);
    assert!(plan.abort.is_empty());
    assert_eq!(plan.repoint, vec![(id.clone(), node)]);
    assert_eq!(plan.start, vec![id.clone()]);

    // Undo on its own removes the placeholder for good.
    let undone = document.apply(MutationBatch::new().remove(node)).unwrap();
    let plan = scan(&undone.diff, &document, &registry);
    assert_eq!(plan.abort, vec![id]);
}
