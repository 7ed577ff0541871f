use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filestore_common::StorageConfig;
use filestore_common::storage::filesystem::FilesystemBlobStore;
use reqwest::Client;
use reqwest::header::HeaderMap;
use sea_orm::DatabaseConnection;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use filestore_server::config::{AppConfig, AuthConfig, CorsConfig, DatabaseConfig, ServerConfig};
use filestore_server::state::AppState;
use filestore_server::store::FileStore;
use filestore_server::utils::jwt;

pub const JWT_SECRET: &str = "test-secret-for-integration-tests";

/// Largest upload the test server accepts.
pub const MAX_UPLOAD_SIZE: u64 = 64 * 1024;

pub mod routes {
    pub const FILES: &str = "/api/v1/files";

    pub fn file(id: i64) -> String {
        format!("/api/v1/files/{id}")
    }

    pub fn file_info(id: i64) -> String {
        format!("/api/v1/files/{id}/info")
    }
}

/// A running test server backed by SQLite and a blob directory in a temp dir.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub db: DatabaseConnection,
    pub blob_root: PathBuf,
    _dir: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Raw response body.
    pub bytes: Vec<u8>,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

/// Fields of an upload form. `None` leaves the field out.
pub struct UploadForm {
    pub filename: Option<String>,
    pub filehash: Option<String>,
    pub filesize: Option<String>,
    pub part_name: String,
    pub data: Vec<u8>,
}

impl UploadForm {
    /// A well-formed upload of `data` named `name`.
    pub fn new(name: &str, data: &[u8]) -> Self {
        Self {
            filename: Some(name.to_string()),
            filehash: Some(sha256_hex(data)),
            filesize: Some(data.len().to_string()),
            part_name: name.to_string(),
            data: data.to_vec(),
        }
    }

    fn into_form(self) -> reqwest::multipart::Form {
        let mut form = reqwest::multipart::Form::new();
        if let Some(filename) = self.filename {
            form = form.text("filename", filename);
        }
        if let Some(filehash) = self.filehash {
            form = form.text("filehash", filehash);
        }
        if let Some(filesize) = self.filesize {
            form = form.text("filesize", filesize);
        }
        let part = reqwest::multipart::Part::bytes(self.data).file_name(self.part_name);
        form.part("file", part)
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

impl TestApp {
    pub async fn spawn() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("meta.db").display());
        let db = filestore_server::database::init_db(&db_url)
            .await
            .expect("Failed to initialize test database");

        let blob_root = dir.path().join("blobs");
        let blobs = FilesystemBlobStore::new(blob_root.clone())
            .await
            .expect("Failed to create blob store");

        let app_config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors: CorsConfig {
                    allow_origins: vec![],
                    max_age: 3600,
                },
            },
            database: DatabaseConfig { url: db_url },
            auth: AuthConfig {
                jwt_secret: JWT_SECRET.to_string(),
            },
            storage: StorageConfig {
                root: blob_root.clone(),
                max_upload_size: MAX_UPLOAD_SIZE,
                ..Default::default()
            },
        };

        let store = FileStore::new(db.clone(), Arc::new(blobs), app_config.storage.clone());
        let state = AppState {
            config: Arc::new(app_config),
            store: Arc::new(store),
        };

        let app = filestore_server::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            db,
            blob_root,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Token for a user id, signed with the server's secret.
    pub fn token_for(&self, user_id: i64) -> String {
        jwt::sign(JWT_SECRET, user_id, &format!("user{user_id}")).expect("Failed to sign token")
    }

    pub async fn upload(&self, form: UploadForm, token: Option<&str>) -> TestResponse {
        let mut req = self.client.post(self.url(routes::FILES));
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let res = req
            .multipart(form.into_form())
            .send()
            .await
            .expect("Failed to send multipart upload request");

        TestResponse::from_response(res).await
    }

    /// Upload `data` as `name` and return the new record's id.
    pub async fn upload_ok(&self, name: &str, data: &[u8], token: &str) -> i64 {
        let res = self.upload(UploadForm::new(name, data), Some(token)).await;
        assert_eq!(res.status, 201, "upload failed: {}", res.text());
        res.id()
    }

    pub async fn get_with_token(&self, path: &str, token: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn get_if_none_match(&self, path: &str, etag: &str, token: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .header("If-None-Match", etag)
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn get_without_token(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn delete_with_token(&self, path: &str, token: &str) -> TestResponse {
        let res = self
            .client
            .delete(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .expect("Failed to send DELETE request");

        TestResponse::from_response(res).await
    }

    /// Number of files under the blob root, temp files included.
    pub fn files_on_disk(&self) -> usize {
        count_files(&self.blob_root)
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .map(|path| if path.is_dir() { count_files(&path) } else { 1 })
        .sum()
}

impl TestResponse {
    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let bytes = res.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Self {
            status,
            headers,
            bytes,
            body,
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn id(&self) -> i64 {
        self.body["id"]
            .as_i64()
            .expect("response body should contain 'id'")
    }

    pub fn code(&self) -> &str {
        self.body["code"].as_str().unwrap_or_default()
    }
}
