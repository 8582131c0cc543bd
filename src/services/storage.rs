// 本地数据持久化服务
//
// 键值存储，两种后端在启动时选定一次：
// - Secure: 整个键值表序列化后用主密码加密写入 secure_store.enc
// - Plain: 键值表以 JSON 明文写入 store.json
//
// 运行期间不会在两种后端之间切换，安全后端的错误直接返回给调用方。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::{Mutex, MutexGuard};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};
use zeroize::Zeroizing;

use crate::crypto::EncryptionHelper;

const SECURE_FILE: &str = "secure_store.enc";
const PLAIN_FILE: &str = "store.json";

type StoreMap = BTreeMap<String, Value>;

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/termpal
/// Linux: ~/.config/termpal
/// Windows: C:\Users\<用户名>\AppData\Roaming\termpal
pub fn default_data_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .context("无法获取系统配置目录")?
        .join("termpal"))
}

/// 后端类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Secure,
    Plain,
}

/// 加密文件后端
pub struct SecureFile {
    path: PathBuf,
    password: Zeroizing<String>,
    helper: EncryptionHelper,
    lock: Mutex<()>,
}

impl SecureFile {
    fn new(path: PathBuf, password: &str, helper: EncryptionHelper) -> Self {
        Self {
            path,
            password: Zeroizing::new(password.to_string()),
            helper,
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<StoreMap> {
        if !self.path.exists() {
            return Ok(StoreMap::new());
        }
        let blob = fs::read_to_string(&self.path).context("无法读取加密存储文件")?;
        self.helper
            .decrypt_object(&blob, &self.password)
            .context("无法解密存储文件")
    }

    fn save(&self, map: &StoreMap) -> Result<()> {
        let blob = self
            .helper
            .encrypt_object(map, &self.password)
            .context("无法加密存储数据")?;
        write_atomic(&self.path, blob.as_bytes())
    }
}

/// 明文文件后端
pub struct PlainFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PlainFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<StoreMap> {
        if !self.path.exists() {
            return Ok(StoreMap::new());
        }
        let content = fs::read_to_string(&self.path).context("无法读取存储文件")?;
        serde_json::from_str(&content).context("无法解析存储文件")
    }

    fn save(&self, map: &StoreMap) -> Result<()> {
        let content = serde_json::to_string_pretty(map).context("无法序列化存储数据")?;
        write_atomic(&self.path, content.as_bytes())
    }
}

/// 存储后端
pub enum StorageBackend {
    Secure(SecureFile),
    Plain(PlainFile),
}

impl StorageBackend {
    /// 明文后端
    pub fn plain(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).context("无法创建数据目录")?;
        Ok(Self::Plain(PlainFile::new(dir.join(PLAIN_FILE))))
    }

    /// 加密后端
    pub fn secure(dir: &Path, master_password: &str) -> Result<Self> {
        Self::secure_with(dir, master_password, EncryptionHelper::new())
    }

    fn secure_with(dir: &Path, master_password: &str, helper: EncryptionHelper) -> Result<Self> {
        fs::create_dir_all(dir).context("无法创建数据目录")?;
        Ok(Self::Secure(SecureFile::new(
            dir.join(SECURE_FILE),
            master_password,
            helper,
        )))
    }

    /// 启动时选择后端
    ///
    /// 没有主密码时使用 Plain。给出主密码时使用 Secure，
    /// 已有的加密文件无法用它解密则返回错误，不会退回明文存储。
    pub fn probe(dir: &Path, master_password: Option<&str>) -> Result<Self> {
        Self::probe_with(dir, master_password, EncryptionHelper::new())
    }

    fn probe_with(
        dir: &Path,
        master_password: Option<&str>,
        helper: EncryptionHelper,
    ) -> Result<Self> {
        let Some(password) = master_password.filter(|p| !p.is_empty()) else {
            info!("[Storage] No master password, using plain storage");
            return Self::plain(dir);
        };

        let backend = Self::secure_with(dir, password, helper)?;
        if let Self::Secure(file) = &backend {
            if let Err(e) = file.load() {
                error!("[Storage] Secure storage cannot be opened: {:#}", e);
                return Err(e).context("主密码无法解密已有的加密存储");
            }
        }
        info!("[Storage] Using secure storage");
        Ok(backend)
    }

    pub fn kind(&self) -> StorageKind {
        match self {
            Self::Secure(_) => StorageKind::Secure,
            Self::Plain(_) => StorageKind::Plain,
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        match self {
            Self::Secure(file) => file.lock.lock(),
            Self::Plain(file) => file.lock.lock(),
        }
    }

    fn load(&self) -> Result<StoreMap> {
        match self {
            Self::Secure(file) => file.load(),
            Self::Plain(file) => file.load(),
        }
    }

    fn save(&self, map: &StoreMap) -> Result<()> {
        match self {
            Self::Secure(file) => file.save(map),
            Self::Plain(file) => file.save(map),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let _guard = self.guard();
        match self.load()?.remove(key) {
            Some(value) => Ok(Some(
                serde_json::from_value(value).with_context(|| format!("无法解析存储项 {}", key))?,
            )),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).with_context(|| format!("无法序列化存储项 {}", key))?;
        let _guard = self.guard();
        let mut map = self.load()?;
        map.insert(key.to_string(), value);
        self.save(&map)?;
        debug!("[Storage] Saved '{}'", key);
        Ok(())
    }

    /// 在同一把锁内读取、修改并写回
    pub fn update<T, R, F>(&self, key: &str, f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<R>,
    {
        let _guard = self.guard();
        let mut map = self.load()?;
        let mut value: T = match map.remove(key) {
            Some(value) => {
                serde_json::from_value(value).with_context(|| format!("无法解析存储项 {}", key))?
            }
            None => T::default(),
        };
        let result = f(&mut value)?;
        map.insert(
            key.to_string(),
            serde_json::to_value(&value).with_context(|| format!("无法序列化存储项 {}", key))?,
        );
        self.save(&map)?;
        Ok(result)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.guard();
        let mut map = self.load()?;
        if map.remove(key).is_some() {
            self.save(&map)?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.guard();
        self.save(&StoreMap::new())
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        let _guard = self.guard();
        Ok(self.load()?.into_keys().collect())
    }
}

/// 先写临时文件再重命名，避免写到一半的文件
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content).with_context(|| format!("无法写入 {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("无法替换 {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_backend(dir: &Path) -> StorageBackend {
    StorageBackend::secure_with(dir, "test-master", EncryptionHelper::with_iterations(1_000))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        count: u32,
    }

    fn fast() -> EncryptionHelper {
        EncryptionHelper::with_iterations(1_000)
    }

    fn exercise(store: &StorageBackend) {
        assert_eq!(store.get::<Item>("missing").unwrap(), None);

        let item = Item {
            name: "a".into(),
            count: 1,
        };
        store.set("item", &item).unwrap();
        store.set("other", &vec![1, 2, 3]).unwrap();
        assert_eq!(store.get::<Item>("item").unwrap(), Some(item));
        assert_eq!(store.keys().unwrap(), vec!["item", "other"]);

        let count = store
            .update("item", |item: &mut Item| {
                item.count += 1;
                Ok(item.count)
            })
            .unwrap();
        assert_eq!(count, 2);

        store.remove("other").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["item"]);
        store.clear().unwrap();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_plain_backend() {
        let dir = tempfile::tempdir().unwrap();
        let store = StorageBackend::plain(dir.path()).unwrap();
        assert_eq!(store.kind(), StorageKind::Plain);
        exercise(&store);
    }

    #[test]
    fn test_secure_backend_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = StorageBackend::secure_with(dir.path(), "master", fast()).unwrap();
        assert_eq!(store.kind(), StorageKind::Secure);
        exercise(&store);

        store.set("secret", &"hunter2-password").unwrap();
        let raw = fs::read_to_string(dir.path().join(SECURE_FILE)).unwrap();
        assert!(!raw.contains("hunter2"));
    }

    #[test]
    fn test_probe_selection() {
        let dir = tempfile::tempdir().unwrap();
        let plain = StorageBackend::probe_with(dir.path(), None, fast()).unwrap();
        assert_eq!(plain.kind(), StorageKind::Plain);
        let empty = StorageBackend::probe_with(dir.path(), Some(""), fast()).unwrap();
        assert_eq!(empty.kind(), StorageKind::Plain);

        let secure = StorageBackend::probe_with(dir.path(), Some("master"), fast()).unwrap();
        assert_eq!(secure.kind(), StorageKind::Secure);
        secure.set("k", &1).unwrap();

        let reopened = StorageBackend::probe_with(dir.path(), Some("master"), fast()).unwrap();
        assert_eq!(reopened.kind(), StorageKind::Secure);
        assert_eq!(reopened.get::<i32>("k").unwrap(), Some(1));
    }

    #[test]
    fn test_wrong_master_password_does_not_downgrade() {
        let dir = tempfile::tempdir().unwrap();
        let secure = StorageBackend::probe_with(dir.path(), Some("right"), fast()).unwrap();
        secure.set("password", &"hunter2").unwrap();

        let wrong = StorageBackend::probe_with(dir.path(), Some("wrnog"), fast());
        assert!(wrong.is_err());
        assert!(!dir.path().join(PLAIN_FILE).exists());

        let reopened = StorageBackend::probe_with(dir.path(), Some("right"), fast()).unwrap();
        assert_eq!(reopened.kind(), StorageKind::Secure);
        assert_eq!(
            reopened.get::<String>("password").unwrap().as_deref(),
            Some("hunter2")
        );
    }

    #[test]
    fn test_secure_errors_are_not_masked() {
        let dir = tempfile::tempdir().unwrap();
        let store = StorageBackend::secure_with(dir.path(), "master", fast()).unwrap();
        store.set("k", &1).unwrap();
        fs::write(dir.path().join(SECURE_FILE), "garbage").unwrap();
        assert!(store.get::<i32>("k").is_err());
        assert!(store.set("k", &2).is_err());
    }
}
