use crate::common::{MAX_UPLOAD_SIZE, TestApp, UploadForm, routes, sha256_hex};

mod file_upload {
    use super::*;

    #[tokio::test]
    async fn upload_returns_created_record() {
        let app = TestApp::spawn().await;
        let token = app.token_for(1);

        let res = app
            .upload(UploadForm::new("notes.TXT", b"hello"), Some(&token))
            .await;

        assert_eq!(res.status, 201, "{}", res.text());
        assert_eq!(res.body["name"], "notes.TXT");
        assert_eq!(res.body["extension"], "txt");
        assert_eq!(res.body["size"], 5);
        assert_eq!(res.body["content_hash"], sha256_hex(b"hello"));
        assert_eq!(res.body["uploader_id"], 1);
        assert_eq!(res.body["deduplicated"], false);
        assert_eq!(app.files_on_disk(), 1);
    }

    #[tokio::test]
    async fn identical_upload_is_deduplicated() {
        let app = TestApp::spawn().await;
        let alice = app.token_for(1);
        let bob = app.token_for(2);

        let first = app.upload_ok("a.txt", b"shared content", &alice).await;
        let res = app
            .upload(UploadForm::new("b.md", b"shared content"), Some(&bob))
            .await;

        assert_eq!(res.status, 201, "{}", res.text());
        assert_ne!(res.id(), first);
        assert_eq!(res.body["deduplicated"], true);
        assert_eq!(res.body["uploader_id"], 2);
        assert_eq!(res.body["name"], "b.md");
        assert_eq!(app.files_on_disk(), 1);
    }

    #[tokio::test]
    async fn filename_falls_back_to_part_name() {
        let app = TestApp::spawn().await;
        let token = app.token_for(1);
        let mut form = UploadForm::new("from-part.png", b"PNG");
        form.filename = None;

        let res = app.upload(form, Some(&token)).await;

        assert_eq!(res.status, 201, "{}", res.text());
        assert_eq!(res.body["name"], "from-part.png");
    }

    #[tokio::test]
    async fn uppercase_hash_is_accepted() {
        let app = TestApp::spawn().await;
        let token = app.token_for(1);
        let mut form = UploadForm::new("a.txt", b"case");
        form.filehash = Some(sha256_hex(b"case").to_uppercase());

        let res = app.upload(form, Some(&token)).await;

        assert_eq!(res.status, 201, "{}", res.text());
        assert_eq!(res.body["content_hash"], sha256_hex(b"case"));
    }

    #[tokio::test]
    async fn mismatched_hash_is_rejected() {
        let app = TestApp::spawn().await;
        let token = app.token_for(1);
        let mut form = UploadForm::new("a.txt", b"actual bytes");
        form.filehash = Some(sha256_hex(b"claimed bytes"));

        let res = app.upload(form, Some(&token)).await;

        assert_eq!(res.status, 422);
        assert_eq!(res.code(), "HASH_MISMATCH");
        assert_eq!(app.files_on_disk(), 0);
    }

    #[tokio::test]
    async fn mismatched_size_is_rejected() {
        let app = TestApp::spawn().await;
        let token = app.token_for(1);
        let mut form = UploadForm::new("a.txt", b"twelve bytes");
        form.filesize = Some("11".into());

        let res = app.upload(form, Some(&token)).await;

        assert_eq!(res.status, 422);
        assert_eq!(res.code(), "HASH_MISMATCH");
        assert_eq!(app.files_on_disk(), 0);
    }

    #[tokio::test]
    async fn malformed_fields_are_validation_errors() {
        let app = TestApp::spawn().await;
        let token = app.token_for(1);

        let mut form = UploadForm::new("a.txt", b"x");
        form.filehash = Some("zz".into());
        let res = app.upload(form, Some(&token)).await;
        assert_eq!(res.status, 400);
        assert_eq!(res.code(), "VALIDATION_ERROR");

        let mut form = UploadForm::new("a.txt", b"x");
        form.filehash = None;
        let res = app.upload(form, Some(&token)).await;
        assert_eq!(res.status, 400);

        let mut form = UploadForm::new("a.txt", b"x");
        form.filesize = Some("-1".into());
        let res = app.upload(form, Some(&token)).await;
        assert_eq!(res.status, 400);

        let mut form = UploadForm::new("a.txt", b"x");
        form.filename = Some("../a.txt".into());
        let res = app.upload(form, Some(&token)).await;
        assert_eq!(res.status, 400);

        assert_eq!(app.files_on_disk(), 0);
    }

    #[tokio::test]
    async fn disallowed_extension_is_rejected() {
        let app = TestApp::spawn().await;
        let token = app.token_for(1);

        let res = app
            .upload(UploadForm::new("setup.exe", b"MZ"), Some(&token))
            .await;

        assert_eq!(res.status, 415);
        assert_eq!(res.code(), "UNSUPPORTED_FILE_TYPE");
    }

    #[tokio::test]
    async fn declared_size_over_limit_is_rejected() {
        let app = TestApp::spawn().await;
        let token = app.token_for(1);
        let mut form = UploadForm::new("a.txt", b"small");
        form.filesize = Some((MAX_UPLOAD_SIZE + 1).to_string());

        let res = app.upload(form, Some(&token)).await;

        assert_eq!(res.status, 413);
        assert_eq!(res.code(), "PAYLOAD_TOO_LARGE");
    }

    #[tokio::test]
    async fn upload_requires_token() {
        let app = TestApp::spawn().await;

        let res = app.upload(UploadForm::new("a.txt", b"x"), None).await;
        assert_eq!(res.status, 401);
        assert_eq!(res.code(), "TOKEN_MISSING");

        let res = app
            .upload(UploadForm::new("a.txt", b"x"), Some("garbage"))
            .await;
        assert_eq!(res.status, 401);
        assert_eq!(res.code(), "TOKEN_INVALID");
    }
}

mod file_download {
    use super::*;

    #[tokio::test]
    async fn download_streams_content_with_headers() {
        let app = TestApp::spawn().await;
        let token = app.token_for(1);
        let id = app.upload_ok("report.txt", b"line one\nline two\n", &token).await;

        let res = app.get_with_token(&routes::file(id), &token).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.bytes, b"line one\nline two\n");
        assert_eq!(res.header("content-length"), Some("18"));
        assert!(res.header("content-type").unwrap().starts_with("text/plain"));
        assert!(
            res.header("content-disposition")
                .unwrap()
                .starts_with("attachment; filename=\"report.txt\"")
        );
        let etag = format!("\"{}\"", sha256_hex(b"line one\nline two\n"));
        assert_eq!(res.header("etag"), Some(etag.as_str()));
    }

    #[tokio::test]
    async fn linked_record_downloads_under_its_own_name() {
        let app = TestApp::spawn().await;
        let alice = app.token_for(1);
        let bob = app.token_for(2);
        app.upload_ok("original.txt", b"same", &alice).await;
        let copy = app.upload_ok("copy.txt", b"same", &bob).await;

        let res = app.get_with_token(&routes::file(copy), &bob).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.bytes, b"same");
        assert!(res.header("content-disposition").unwrap().contains("copy.txt"));
    }

    #[tokio::test]
    async fn matching_etag_returns_not_modified() {
        let app = TestApp::spawn().await;
        let token = app.token_for(1);
        let id = app.upload_ok("a.txt", b"cached", &token).await;
        let etag = format!("\"{}\"", sha256_hex(b"cached"));

        let res = app.get_if_none_match(&routes::file(id), &etag, &token).await;

        assert_eq!(res.status, 304);
        assert!(res.bytes.is_empty());
    }

    #[tokio::test]
    async fn info_returns_metadata() {
        let app = TestApp::spawn().await;
        let token = app.token_for(7);
        let id = app.upload_ok("a.pdf", b"%PDF", &token).await;

        let res = app.get_with_token(&routes::file_info(id), &token).await;

        assert_eq!(res.status, 200);
        assert_eq!(res.id(), id);
        assert_eq!(res.body["uploader_id"], 7);
        assert_eq!(res.body["extension"], "pdf");
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let app = TestApp::spawn().await;
        let token = app.token_for(1);

        let res = app.get_with_token(&routes::file(999), &token).await;
        assert_eq!(res.status, 404);
        assert_eq!(res.code(), "NOT_FOUND");

        let res = app.get_with_token(&routes::file_info(999), &token).await;
        assert_eq!(res.status, 404);
    }

    #[tokio::test]
    async fn download_requires_token() {
        let app = TestApp::spawn().await;
        let token = app.token_for(1);
        let id = app.upload_ok("a.txt", b"private", &token).await;

        let res = app.get_without_token(&routes::file(id)).await;

        assert_eq!(res.status, 401);
    }
}

mod file_delete {
    use super::*;

    #[tokio::test]
    async fn only_uploader_can_delete() {
        let app = TestApp::spawn().await;
        let alice = app.token_for(1);
        let mallory = app.token_for(2);
        let id = app.upload_ok("a.txt", b"mine", &alice).await;

        let res = app.delete_with_token(&routes::file(id), &mallory).await;

        assert_eq!(res.status, 403);
        assert_eq!(res.code(), "PERMISSION_DENIED");
        assert_eq!(app.get_with_token(&routes::file(id), &alice).await.status, 200);
    }

    #[tokio::test]
    async fn deleting_sole_record_frees_content() {
        let app = TestApp::spawn().await;
        let token = app.token_for(1);
        let id = app.upload_ok("a.txt", b"short lived", &token).await;

        let res = app.delete_with_token(&routes::file(id), &token).await;

        assert_eq!(res.status, 204);
        assert_eq!(app.files_on_disk(), 0);
        assert_eq!(app.get_with_token(&routes::file(id), &token).await.status, 404);
    }

    #[tokio::test]
    async fn deleting_owner_keeps_content_for_others() {
        let app = TestApp::spawn().await;
        let alice = app.token_for(1);
        let bob = app.token_for(2);
        let original = app.upload_ok("a.txt", b"popular", &alice).await;
        let copy = app.upload_ok("b.txt", b"popular", &bob).await;

        let res = app.delete_with_token(&routes::file(original), &alice).await;
        assert_eq!(res.status, 204);

        let res = app.get_with_token(&routes::file(copy), &bob).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.bytes, b"popular");

        // The original record survives without an uploader, so nobody can delete it.
        let info = app.get_with_token(&routes::file_info(original), &alice).await;
        assert!(info.body["uploader_id"].is_null());
        let res = app.delete_with_token(&routes::file(original), &alice).await;
        assert_eq!(res.status, 403);

        // Releasing the last copy frees everything.
        let res = app.delete_with_token(&routes::file(copy), &bob).await;
        assert_eq!(res.status, 204);
        assert_eq!(app.files_on_disk(), 0);
        let info = app.get_with_token(&routes::file_info(original), &alice).await;
        assert_eq!(info.status, 404);
    }

    #[tokio::test]
    async fn deleting_copy_keeps_original() {
        let app = TestApp::spawn().await;
        let alice = app.token_for(1);
        let bob = app.token_for(2);
        let original = app.upload_ok("a.txt", b"kept", &alice).await;
        let copy = app.upload_ok("b.txt", b"kept", &bob).await;

        let res = app.delete_with_token(&routes::file(copy), &bob).await;

        assert_eq!(res.status, 204);
        assert_eq!(app.files_on_disk(), 1);
        let res = app.get_with_token(&routes::file(original), &alice).await;
        assert_eq!(res.bytes, b"kept");
    }
}
