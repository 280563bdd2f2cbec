//! Purpose: Administrative CRUD on corpora, projects, roles and media tracks.
//! Exports: `AdminRecord`, `Corpus`, `Project`, `Role`, and admin methods on `LabbcatClient`.
//! Role: One generic create/read/update/delete path over `api/admin/<collection>`.
//! Invariants: Create is POST, read is GET, update is PUT (all JSON), delete is DELETE `/<key>`.
#![allow(clippy::result_large_err)]

use super::client::{ApiResult, LabbcatClient, Params};
use super::store::MediaTrack;
use crate::core::page::Page;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record type managed under `api/admin/<COLLECTION>`.
pub trait AdminRecord: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;

    /// The value that identifies the record in delete URLs.
    fn key(&self) -> &str;
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Corpus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_id: Option<i64>,
    pub corpus_name: String,
    /// ISO 639-1 code of the corpus's default language.
    #[serde(default)]
    pub corpus_language: String,
    #[serde(default)]
    pub corpus_description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Corpus {
    pub fn new(
        name: impl Into<String>,
        language: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            corpus_id: None,
            corpus_name: name.into(),
            corpus_language: language.into(),
            corpus_description: description.into(),
            extra: Map::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Project {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    pub project: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Project {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            project_id: None,
            project: name.into(),
            description: description.into(),
            extra: Map::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Role {
    pub role_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Role {
    pub fn new(role_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            description: description.into(),
            extra: Map::new(),
        }
    }
}

impl AdminRecord for Corpus {
    const COLLECTION: &'static str = "corpora";

    fn key(&self) -> &str {
        &self.corpus_name
    }
}

impl AdminRecord for Project {
    const COLLECTION: &'static str = "projects";

    fn key(&self) -> &str {
        &self.project
    }
}

impl AdminRecord for Role {
    const COLLECTION: &'static str = "roles";

    fn key(&self) -> &str {
        &self.role_id
    }
}

impl AdminRecord for MediaTrack {
    const COLLECTION: &'static str = "mediatracks";

    fn key(&self) -> &str {
        &self.suffix
    }
}

impl LabbcatClient {
    fn admin_url<R: AdminRecord>(&self, key: Option<&str>) -> ApiResult<url::Url> {
        match key {
            Some(key) => self.endpoint(&["api", "admin", R::COLLECTION, key]),
            None => self.endpoint(&["api", "admin", R::COLLECTION]),
        }
    }

    /// Creates a record and returns it as stored by the server.
    pub fn create_record<R: AdminRecord>(&self, record: &R) -> ApiResult<R> {
        let url = self.admin_url::<R>(None)?;
        let created = self.send_json_model("POST", &url, record)?;
        tracing::info!(collection = R::COLLECTION, key = record.key(), "record created");
        Ok(created)
    }

    pub fn read_records<R: AdminRecord>(&self, page: Option<Page>) -> ApiResult<Vec<R>> {
        let url = self.admin_url::<R>(None)?;
        let params = match page {
            Some(page) => Params::new()
                .with("pageNumber", page.number)
                .with("pageLength", page.length),
            None => Params::new(),
        };
        self.get_model(&url, &params)
    }

    pub fn update_record<R: AdminRecord>(&self, record: &R) -> ApiResult<R> {
        let url = self.admin_url::<R>(None)?;
        let updated = self.send_json_model("PUT", &url, record)?;
        tracing::info!(collection = R::COLLECTION, key = record.key(), "record updated");
        Ok(updated)
    }

    pub fn delete_record<R: AdminRecord>(&self, key: &str) -> ApiResult<()> {
        let url = self.admin_url::<R>(Some(key))?;
        self.delete_model::<Value>(&url)?;
        tracing::info!(collection = R::COLLECTION, key, "record deleted");
        Ok(())
    }

    pub fn create_corpus(&self, corpus: &Corpus) -> ApiResult<Corpus> {
        self.create_record(corpus)
    }

    pub fn read_corpora(&self, page: Option<Page>) -> ApiResult<Vec<Corpus>> {
        self.read_records(page)
    }

    pub fn update_corpus(&self, corpus: &Corpus) -> ApiResult<Corpus> {
        self.update_record(corpus)
    }

    pub fn delete_corpus(&self, corpus_name: &str) -> ApiResult<()> {
        self.delete_record::<Corpus>(corpus_name)
    }

    pub fn create_project(&self, project: &Project) -> ApiResult<Project> {
        self.create_record(project)
    }

    pub fn read_projects(&self, page: Option<Page>) -> ApiResult<Vec<Project>> {
        self.read_records(page)
    }

    pub fn update_project(&self, project: &Project) -> ApiResult<Project> {
        self.update_record(project)
    }

    pub fn delete_project(&self, project: &str) -> ApiResult<()> {
        self.delete_record::<Project>(project)
    }

    pub fn create_role(&self, role: &Role) -> ApiResult<Role> {
        self.create_record(role)
    }

    pub fn read_roles(&self, page: Option<Page>) -> ApiResult<Vec<Role>> {
        self.read_records(page)
    }

    pub fn update_role(&self, role: &Role) -> ApiResult<Role> {
        self.update_record(role)
    }

    pub fn delete_role(&self, role_id: &str) -> ApiResult<()> {
        self.delete_record::<Role>(role_id)
    }

    pub fn create_media_track(&self, track: &MediaTrack) -> ApiResult<MediaTrack> {
        self.create_record(track)
    }

    pub fn read_media_tracks(&self, page: Option<Page>) -> ApiResult<Vec<MediaTrack>> {
        self.read_records(page)
    }

    pub fn update_media_track(&self, track: &MediaTrack) -> ApiResult<MediaTrack> {
        self.update_record(track)
    }

    pub fn delete_media_track(&self, suffix: &str) -> ApiResult<()> {
        self.delete_record::<MediaTrack>(suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::{AdminRecord, Corpus, Project, Role};
    use crate::api::store::MediaTrack;
    use serde_json::json;

    #[test]
    fn corpus_serializes_with_server_field_names() {
        let corpus = Corpus::new("unit-test", "en", "Temporary corpus");
        assert_eq!(
            serde_json::to_value(&corpus).expect("json"),
            json!({
                "corpus_name": "unit-test",
                "corpus_language": "en",
                "corpus_description": "Temporary corpus"
            })
        );
    }

    #[test]
    fn server_records_keep_ids_and_unknown_fields() {
        let corpus: Corpus = serde_json::from_value(json!({
            "corpus_id": 7,
            "corpus_name": "QB",
            "corpus_language": "en",
            "corpus_description": "Quake Box",
            "_cantDelete": "has transcripts"
        }))
        .expect("corpus");
        assert_eq!(corpus.corpus_id, Some(7));
        assert_eq!(corpus.extra.get("_cantDelete"), Some(&json!("has transcripts")));
    }

    #[test]
    fn keys_and_collections() {
        assert_eq!(Corpus::new("QB", "en", "").key(), "QB");
        assert_eq!(Project::new("p1", "").key(), "p1");
        assert_eq!(Role::new("reader", "").key(), "reader");
        assert_eq!(MediaTrack::new("_face", "Face", 2).key(), "_face");
        assert_eq!(<MediaTrack as AdminRecord>::COLLECTION, "mediatracks");
        assert_eq!(
            serde_json::to_value(MediaTrack::new("_face", "Face", 2)).expect("json"),
            json!({"suffix": "_face", "description": "Face", "display_order": 2})
        );
    }
}
