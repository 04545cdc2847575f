use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::arena::tests::PatternRegion;
use crate::arena::{Arena, HeapStrategy};
use crate::client::{AsyncClient, RequestState};
use crate::file::FileConfig;
use crate::transport::tests::{MockTransport, Transaction};

const HOST: &str = "db.example.com";
const PORT: u16 = 443;

fn request(payload_len: usize) -> Vec<u8> {
    (0..payload_len).map(|i| (i % 251) as u8).collect()
}

fn response() -> Vec<u8> {
    (0..64).map(|i| b'a' + (i % 26) as u8).collect()
}

fn drive(client: &mut AsyncClient<&mut MockTransport>) {
    let mut now = 0;
    while !client.poll(now) {
        now += 10;
        assert!(now < 1000, "The request never completed");
    }
}

#[test]
fn request_over_slow_connection() {
    let response = response();
    let expectations = [
        Transaction::Connect(HOST, PORT),
        Transaction::Status(false),
        Transaction::Status(false),
        Transaction::Status(false),
        Transaction::Status(true),
        Transaction::Send {
            expected: 128,
            sent: 128,
        },
        Transaction::receive(&response, 0),
        Transaction::receive(&[], 0),
        Transaction::Stop,
    ];

    let arena = Arena::new();
    let mut mock = MockTransport::new(&expectations);
    let mut client = AsyncClient::new(&mut mock, arena.clone());

    client.begin(HOST, PORT, &request(128), 0).unwrap();
    drive(&mut client);

    assert_eq!(client.state(), RequestState::Done);
    assert!(!client.result().is_error());
    assert_eq!(client.result().payload(), response.as_slice());
    assert_eq!(arena.live_blocks(), 0);

    drop(client);
    assert_eq!(mock.sent, request(128));
    mock.done();
}

#[test]
fn upload_staged_in_external_memory() {
    let region = Rc::new(PatternRegion::new(4096));
    let arena = Arena::with_strategy(HeapStrategy::External(region.clone()));

    let mut blob: FileConfig<'_> = FileConfig::new(arena.clone());
    blob.init_blob_writer(96);
    assert!(blob.is_internal());
    assert_eq!(blob.write(&request(96)), 96);

    let mut upload = Vec::new();
    while blob.remaining() > 0 {
        upload.extend_from_slice(blob.read_chunk(40));
    }
    assert_eq!(upload, request(96));

    let expectations = [
        Transaction::Connect(HOST, PORT),
        Transaction::Status(true),
        Transaction::Send {
            expected: 96,
            sent: 96,
        },
        Transaction::receive(b"OK", 0),
        Transaction::receive(&[], 0),
        Transaction::Stop,
    ];
    let mut mock = MockTransport::new(&expectations);
    let mut client = AsyncClient::new(&mut mock, arena.clone());

    client.begin(HOST, PORT, blob.data(), 0).unwrap();
    blob.clear();
    drive(&mut client);

    assert_eq!(client.result().payload_str(), Some("OK"));
    assert!(region.reservations.get() >= 3);
    assert_eq!(arena.live_blocks(), 0);

    drop(client);
    mock.done();
}

#[cfg(feature = "jwt")]
#[test]
fn token_exchange_request() {
    use alloc::format;

    use crate::clock::{MINIMUM_VALID_TIMESTAMP, ManualClock};
    use crate::error::Result;
    use crate::jwt::{AuthData, DIGEST_SIZE, ServiceAccount, Signer, TokenGenerator, TokenKind};

    struct DigestSigner;

    impl Signer for DigestSigner {
        fn algorithm(&self) -> &'static str {
            "RS256"
        }

        fn sign(
            &mut self,
            _private_key: &str,
            digest: &[u8; DIGEST_SIZE],
            signature: &mut [u8],
        ) -> Result<usize> {
            signature[..DIGEST_SIZE].copy_from_slice(digest);
            Ok(DIGEST_SIZE)
        }
    }

    let arena = Arena::new();
    let clock = ManualClock::new(MINIMUM_VALID_TIMESTAMP);
    let auth = AuthData::new(
        ServiceAccount::new("device@project.iam.gserviceaccount.com", "project", "key"),
        TokenKind::access_token(),
    );

    let mut generator = TokenGenerator::new(DigestSigner, arena.clone());
    while !generator.poll(&auth, &clock) {
        clock.advance(10);
    }
    let token = generator.token().unwrap();

    let body = format!(
        "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer&assertion={token}"
    );
    let expectations = [
        Transaction::Connect("oauth2.googleapis.com", PORT),
        Transaction::Status(true),
        Transaction::Send {
            expected: body.len(),
            sent: body.len() as u32,
        },
        Transaction::receive(br#"{"access_token":"ya29"}"#, 0),
        Transaction::receive(&[], 0),
        Transaction::Stop,
    ];
    let mut mock = MockTransport::new(&expectations);
    let mut client = AsyncClient::new(&mut mock, arena.clone());

    client
        .begin("oauth2.googleapis.com", PORT, body.as_bytes(), 0)
        .unwrap();
    drive(&mut client);

    assert_eq!(
        client.result().payload_str(),
        Some(r#"{"access_token":"ya29"}"#)
    );

    drop(client);
    assert_eq!(mock.sent, body.as_bytes());
    mock.done();

    generator.clear();
    assert_eq!(arena.live_blocks(), 0);
}
