use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use oblipass_core::record::{RecordFields, RecordStore, StoreError, UserRecord};

const RECORDS_FILE_NAME: &str = "user_records.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordsFile {
    records: BTreeMap<String, UserRecord>,
}

/// Document store backed by a single JSON file with atomic rewrites.
/// Opening the store doubles as the startup liveness probe: a data directory
/// that cannot be read or written terminates the process before it serves
/// traffic. A production deployment puts a shared document database behind
/// the same [`RecordStore`] interface.
#[derive(Debug)]
pub struct FileRecordStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, UserRecord>>,
}

impl FileRecordStore {
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        let path = data_dir.join(RECORDS_FILE_NAME);
        let records = if path.exists() {
            let bytes =
                std::fs::read(&path).map_err(|err| StoreError::Unavailable(err.to_string()))?;
            serde_json::from_slice::<RecordsFile>(&bytes)
                .map_err(|err| StoreError::Encoding(err.to_string()))?
                .records
        } else {
            // Probe writability up front rather than on the first request.
            persist_to(&path, &BTreeMap::new())?;
            BTreeMap::new()
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }
}

fn persist_to(path: &Path, records: &BTreeMap<String, UserRecord>) -> Result<(), StoreError> {
    let file = RecordsFile {
        records: records.clone(),
    };
    let encoded =
        serde_json::to_vec_pretty(&file).map_err(|err| StoreError::Encoding(err.to_string()))?;
    let tmp_path = path.with_extension("tmp");
    let mut tmp = File::create(&tmp_path).map_err(|err| StoreError::Unavailable(err.to_string()))?;
    tmp.write_all(&encoded)
        .and_then(|()| tmp.sync_all())
        .map_err(|err| StoreError::Unavailable(err.to_string()))?;
    std::fs::rename(&tmp_path, path).map_err(|err| StoreError::Unavailable(err.to_string()))?;
    Ok(())
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn get(&self, user_hash: &str) -> Result<UserRecord, StoreError> {
        self.records
            .lock()
            .get(user_hash)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create(&self, record: UserRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        if records.contains_key(&record.user_hash) {
            return Err(StoreError::Conflict);
        }
        records.insert(record.user_hash.clone(), record);
        persist_to(&self.path, &records)
    }

    async fn update(&self, user_hash: &str, fields: RecordFields) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let record = records.get_mut(user_hash).ok_or(StoreError::NotFound)?;
        record.apply(fields);
        persist_to(&self.path, &records)
    }
}
