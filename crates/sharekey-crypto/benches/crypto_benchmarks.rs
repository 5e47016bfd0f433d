//! Benchmarks for sharekey-crypto

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sharekey_crypto::{
    hashing::hash,
    keys::{FileKey, KeyPair, PublicKey},
    password::KdfParams,
    symmetric::AeadCipher,
    Crypt, CryptConfig,
};
use std::collections::BTreeMap;

fn bench_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashing");

    for size in [1024, 64 * 1024].iter() {
        let data = vec![0u8; *size];
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("blake3", size), &data, |b, data| {
            b.iter(|| hash(data))
        });
    }

    group.finish();
}

fn bench_content(c: &mut Criterion) {
    let mut group = c.benchmark_group("content");

    for cipher in [AeadCipher::Aes256Gcm, AeadCipher::ChaCha20Poly1305] {
        let crypt = Crypt::new(CryptConfig {
            cipher,
            ..CryptConfig::default()
        })
        .unwrap();
        let key = FileKey::generate().unwrap();

        for size in [1024, 64 * 1024, 1024 * 1024].iter() {
            let data = vec![0u8; *size];
            group.throughput(Throughput::Bytes(*size as u64));

            group.bench_with_input(
                BenchmarkId::new(format!("{}-seal", cipher.algorithm_id()), size),
                &data,
                |b, data| b.iter(|| crypt.seal_content(&key, data).unwrap()),
            );

            let sealed = crypt.seal_content(&key, &data).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("{}-open", cipher.algorithm_id()), size),
                &sealed,
                |b, sealed| b.iter(|| crypt.open_content(&key, sealed).unwrap()),
            );
        }
    }

    group.finish();
}

fn bench_wrapping(c: &mut Criterion) {
    let mut group = c.benchmark_group("wrapping");
    let crypt = Crypt::new(CryptConfig::default()).unwrap();
    let file_key = FileKey::generate().unwrap();

    for count in [1usize, 4, 16].iter() {
        let pairs: Vec<KeyPair> = (0..*count).map(|_| KeyPair::generate().unwrap()).collect();
        let recipients: BTreeMap<String, PublicKey> = pairs
            .iter()
            .enumerate()
            .map(|(i, p)| (format!("user{}", i), p.public_key().clone()))
            .collect();

        group.bench_with_input(
            BenchmarkId::new("multi-key-encrypt", count),
            &recipients,
            |b, recipients| b.iter(|| crypt.multi_key_encrypt(&file_key, recipients, 1).unwrap()),
        );
    }

    let pair = KeyPair::generate().unwrap();
    let mut single = BTreeMap::new();
    single.insert("user".to_string(), pair.public_key().clone());
    let wrapped = crypt.multi_key_encrypt(&file_key, &single, 1).unwrap();
    group.bench_function("multi-key-decrypt", |b| {
        b.iter(|| crypt.multi_key_decrypt(&wrapped["user"], pair.private_key()).unwrap())
    });

    group.finish();
}

fn bench_private_key_escrow(c: &mut Criterion) {
    let mut group = c.benchmark_group("escrow");
    group.sample_size(10);

    let crypt = Crypt::new(CryptConfig {
        kdf: KdfParams::default(),
        ..CryptConfig::default()
    })
    .unwrap();
    let pair = KeyPair::generate().unwrap();
    let blob = crypt.encrypt_private_key(pair.private_key(), "password", None).unwrap();

    group.bench_function("decrypt-private-key", |b| {
        b.iter(|| crypt.decrypt_private_key(&blob, "password", None).unwrap())
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_hashing,
    bench_content,
    bench_wrapping,
    bench_private_key_escrow
);
criterion_main!(benches);
