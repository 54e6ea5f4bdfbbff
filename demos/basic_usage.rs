use scaleout_ring::{Mapping, Ring};
use std::sync::Arc;
use std::thread;

#[derive(Clone, Debug)]
struct ChatMessage {
    id: u64,
    body: String,
}

impl Mapping for ChatMessage {
    fn id(&self) -> u64 {
        self.id
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let ring = Arc::new(Ring::<ChatMessage>::new(1024));

    let producer = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            for i in 0..10 {
                ring.append(ChatMessage {
                    id: i,
                    body: format!("message {i}"),
                });
            }
        })
    };
    producer.join().unwrap();

    let mut cursor = 0;
    loop {
        let batch = ring.read(cursor);
        for message in &batch.messages {
            println!("[{cursor}] {}: {}", message.id, message.body);
        }
        cursor = batch.next_cursor + batch.messages.len() as u64;
        if !batch.has_more && batch.messages.is_empty() {
            break;
        }
    }

    println!("most recent message id: {:?}", ring.max_mapping().map(|m| m.id));
    println!("oldest addressable id: {}", ring.min_mapping_id());
}
