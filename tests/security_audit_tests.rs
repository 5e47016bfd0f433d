//! Security audit tests
//!
//! Each module covers one class of attack on stored key material or
//! encrypted content.

use sharekey_core::{
    Backends, EncryptedStorage, EncryptionConfig, FileView, KeyError, KeyManager, KeyStorage, MemoryAppConfig, MemoryFileCache,
    MemoryView, Session, ShareTable, StorageError, ViewKeyStorage,
};
use sharekey_crypto::KdfParams;
use std::sync::Arc;

struct Harness {
    view: Arc<MemoryView>,
    backends: Backends,
    shares: Arc<ShareTable>,
    config: EncryptionConfig,
}

impl Harness {
    fn new() -> Self {
        let view = Arc::new(MemoryView::new());
        let config = EncryptionConfig {
            secret: "audit-secret".to_string(),
            kdf: KdfParams::minimal(),
            ..EncryptionConfig::default()
        };
        let backends = Backends {
            key_storage: Arc::new(ViewKeyStorage::new(view.clone(), &config)),
            file_cache: Arc::new(MemoryFileCache::new()),
            app_config: Arc::new(MemoryAppConfig::new()),
        };
        Self {
            view,
            backends,
            shares: Arc::new(ShareTable::new()),
            config,
        }
    }

    fn login(&self) -> Arc<KeyManager> {
        Arc::new(KeyManager::new(self.config.clone(), &self.backends, Arc::new(Session::new())).unwrap())
    }

    fn storage(&self, km: &Arc<KeyManager>) -> EncryptedStorage {
        EncryptedStorage::new(self.view.clone(), km.clone(), self.shares.clone())
    }

    /// alice with keys, logged in, owning one encrypted file
    fn with_alice_file(&self, data: &[u8]) -> Arc<KeyManager> {
        let km = self.login();
        km.create_user_keys("alice", "alice-pw").unwrap();
        assert!(km.init("alice", "alice-pw").unwrap());
        self.storage(&km).write("alice", "/secret.txt", data).unwrap();
        km
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn is_unreadable<T>(result: sharekey_core::Result<T>) -> bool {
    matches!(result, Err(KeyError::Storage(StorageError::Unreadable(_))))
}

mod password_protection {
    use super::*;

    #[test]
    fn test_wrong_password_does_not_log_in() {
        let h = Harness::new();
        let km = h.login();
        km.create_user_keys("alice", "right").unwrap();

        assert!(!km.init("alice", "wrong").unwrap());
        assert!(!km.session().is_private_key_set());
        assert!(!km.prepare_decrypt_all("alice", "wrong").unwrap());
    }

    #[test]
    fn test_password_change_requires_old_password() {
        let h = Harness::new();
        let km = h.login();
        km.create_user_keys("alice", "right").unwrap();

        assert!(!km.change_user_password("alice", "guess", "new").unwrap());
        assert!(km.init("alice", "right").unwrap());
    }

    #[test]
    fn test_private_key_blob_hides_key_material() {
        let h = Harness::new();
        let km = h.login();
        km.create_user_keys("alice", "pw").unwrap();

        let blob = km.get_private_key("alice").unwrap();
        let private = km.crypt().decrypt_private_key(&blob, "pw", Some("alice")).unwrap();
        assert!(!contains(&blob, private.as_bytes()));
    }
}

mod context_binding {
    use super::*;

    /// A private key blob copied into another user's slot does not open
    #[test]
    fn test_swapped_user_key_rejected() {
        let h = Harness::new();
        let km = h.login();
        km.create_user_keys("alice", "same").unwrap();
        km.create_user_keys("bob", "same").unwrap();

        let alice_blob = km.get_private_key("alice").unwrap();
        km.set_private_key("bob", &alice_blob).unwrap();
        assert!(!km.init("bob", "same").unwrap());
    }

    /// System keys are bound to their key id, not to a user id
    #[test]
    fn test_system_key_bound_to_key_id() {
        let h = Harness::new();
        let km = h.login();
        km.validate_public_share_key().unwrap();

        let share_id = km.get_public_share_key_id().to_string();
        let blob = km.get_system_private_key(&share_id).unwrap();
        let password = km.get_master_key_password().unwrap();
        assert!(km.crypt().decrypt_private_key(&blob, &password, Some(&share_id)).is_ok());
        assert!(km.crypt().decrypt_private_key(&blob, &password, Some("alice")).is_err());
        assert!(km.crypt().decrypt_private_key(&blob, &password, None).is_err());
    }
}

mod content_tampering {
    use super::*;

    #[test]
    fn test_tampered_header_rejected() {
        let h = Harness::new();
        let km = h.with_alice_file(b"top secret");

        let mut raw = h.view.read("/alice/files/secret.txt").unwrap();
        let at = raw.windows(8).position(|w| w == b"version:").unwrap() + 8;
        raw[at] = if raw[at] == b'1' { b'2' } else { b'1' };
        h.view.write("/alice/files/secret.txt", &raw).unwrap();

        assert!(is_unreadable(h.storage(&km).read("alice", "/secret.txt")));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let h = Harness::new();
        let km = h.with_alice_file(b"top secret");

        let mut raw = h.view.read("/alice/files/secret.txt").unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        h.view.write("/alice/files/secret.txt", &raw).unwrap();

        assert!(is_unreadable(h.storage(&km).read("alice", "/secret.txt")));
    }

    #[test]
    fn test_stored_content_hides_plaintext() {
        let h = Harness::new();
        h.with_alice_file(b"top secret");
        let raw = h.view.read("/alice/files/secret.txt").unwrap();
        assert!(!contains(&raw, b"top secret"));
    }
}

mod key_substitution {
    use super::*;

    /// A share key from an earlier write is not accepted after a rewrite
    #[test]
    fn test_stale_share_key_rejected() {
        let h = Harness::new();
        let km = h.with_alice_file(b"v1");
        let path = "/alice/files/secret.txt";
        let stale = h.backends.key_storage.get_file_key(path, "alice.shareKey").unwrap().unwrap();

        h.storage(&km).write("alice", "/secret.txt", b"v2").unwrap();
        assert_eq!(km.get_version(path), 2);
        h.backends.key_storage.set_file_key(path, "alice.shareKey", &stale).unwrap();

        assert_eq!(km.get_file_key(path, Some("alice")).unwrap(), None);
        assert!(is_unreadable(h.storage(&km).read("alice", "/secret.txt")));
    }

    /// Another file's share key does not open this file
    #[test]
    fn test_share_key_from_other_file_rejected() {
        let h = Harness::new();
        let km = h.with_alice_file(b"one");
        h.storage(&km).write("alice", "/other.txt", b"two").unwrap();

        let foreign = h
            .backends
            .key_storage
            .get_file_key("/alice/files/other.txt", "alice.shareKey")
            .unwrap()
            .unwrap();
        h.backends
            .key_storage
            .set_file_key("/alice/files/secret.txt", "alice.shareKey", &foreign)
            .unwrap();

        assert!(is_unreadable(h.storage(&km).read("alice", "/secret.txt")));
    }

    #[test]
    fn test_malformed_share_key_reads_as_missing() {
        let h = Harness::new();
        let km = h.with_alice_file(b"data");
        h.backends
            .key_storage
            .set_file_key("/alice/files/secret.txt", "alice.shareKey", b"not a key")
            .unwrap();
        assert_eq!(km.get_file_key("/alice/files/secret.txt", Some("alice")).unwrap(), None);
    }

    #[test]
    fn test_file_key_record_hides_file_key() {
        let h = Harness::new();
        let km = h.with_alice_file(b"data");
        let path = "/alice/files/secret.txt";
        let file_key = km.get_file_key(path, Some("alice")).unwrap().unwrap();

        for key_id in h.backends.key_storage.list_file_key_ids(path).unwrap() {
            let blob = h.backends.key_storage.get_file_key(path, &key_id).unwrap().unwrap();
            assert!(!contains(&blob, file_key.as_bytes()), "{} leaks the file key", key_id);
        }
    }
}

mod access_isolation {
    use super::*;

    #[test]
    fn test_unshared_user_cannot_read() {
        let h = Harness::new();
        h.with_alice_file(b"mine");

        let bob = h.login();
        bob.create_user_keys("bob", "bob-pw").unwrap();
        bob.init("bob", "bob-pw").unwrap();
        assert_eq!(bob.get_file_key("/alice/files/secret.txt", Some("bob")).unwrap(), None);
        assert!(is_unreadable(h.storage(&bob).read("alice", "/secret.txt")));
    }

    #[test]
    fn test_logged_out_session_cannot_read() {
        let h = Harness::new();
        let km = h.with_alice_file(b"mine");
        km.session().clear();
        assert_eq!(km.get_file_key("/alice/files/secret.txt", Some("alice")).unwrap(), None);
    }

    /// Public share access needs the file to be published
    #[test]
    fn test_public_share_key_requires_publication() {
        let h = Harness::new();
        let km = h.login();
        km.validate_public_share_key().unwrap();
        km.create_user_keys("alice", "pw").unwrap();
        km.init("alice", "pw").unwrap();
        h.storage(&km).write("alice", "/private.txt", b"p").unwrap();

        let anonymous = h.login();
        assert_eq!(anonymous.get_file_key("/alice/files/private.txt", None).unwrap(), None);
    }
}
