use super::*;
use crate::backend::memory::{Fault, MemoryBackend};

fn setup() -> (Arc<MemoryBackend>, ProfileService, Uuid) {
    let backend = Arc::new(MemoryBackend::new());
    let svc = ProfileService::new(&Backend::from_client(backend.clone()), "avatars");
    let id = Uuid::new_v4();
    backend.put_profile(Profile { id, username: Some("ivy".into()), avatar_url: Some("memory://avatars/old.png".into()) });
    (backend, svc, id)
}

fn png(name: &str) -> ImageFile {
    ImageFile { name: name.into(), bytes: vec![0x89, 0x50, 0x4e, 0x47], content_type: "image/png".into() }
}

#[tokio::test]
async fn load_missing_profile_is_not_found() {
    let (_, svc, _) = setup();
    assert!(matches!(svc.load(Uuid::new_v4()).await, Err(ServiceError::NotFound)));
}

#[tokio::test]
async fn rename_keeps_avatar() {
    let (_, svc, id) = setup();
    let updated = svc.update(id, " ivy2 ", None).await.unwrap();
    assert_eq!(updated.username.as_deref(), Some("ivy2"));
    assert_eq!(updated.avatar_url.as_deref(), Some("memory://avatars/old.png"));
}

#[tokio::test]
async fn avatar_upload_replaces_url() {
    let (backend, svc, id) = setup();
    let updated = svc.update(id, "ivy", Some(png("me.png"))).await.unwrap();
    let path = format!("{id}.png");
    assert_eq!(updated.avatar_url, Some(format!("memory://avatars/{path}")));
    assert!(backend.blob("avatars", &path).is_some());

    // Re-upload overwrites in place.
    svc.update(id, "ivy", Some(png("again.png"))).await.unwrap();
}

#[tokio::test]
async fn failed_upload_keeps_previous_avatar_but_saves_name() {
    let (backend, svc, id) = setup();
    backend.set_fault(Fault::Upload, true);
    let updated = svc.update(id, "ivy3", Some(png("me.png"))).await.unwrap();
    assert_eq!(updated.username.as_deref(), Some("ivy3"));
    assert_eq!(updated.avatar_url.as_deref(), Some("memory://avatars/old.png"));
}

#[tokio::test]
async fn rejects_blank_username_and_empty_file() {
    let (_, svc, id) = setup();
    assert!(matches!(
        svc.update(id, "", None).await,
        Err(ServiceError::Validation(ValidationError::EmptyUsername))
    ));
    let empty = ImageFile { name: "x.png".into(), bytes: Vec::new(), content_type: "image/png".into() };
    assert!(matches!(
        svc.update(id, "ivy", Some(empty)).await,
        Err(ServiceError::Validation(ValidationError::EmptyFile))
    ));
}
