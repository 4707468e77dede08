//! Hand results from worker threads back to the requesting thread by request id.
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lockwatch::SessionError;
use lockwatch::WaitSession;

fn main() -> Result<(), SessionError> {
    tracing_subscriber::fmt().init();

    let sessions = Arc::new(WaitSession::<u32, String>::new());

    for request in 0..4u32 {
        sessions.add(request)?;

        // Request 3 is never answered
        if request < 3 {
            let sessions = Arc::clone(&sessions);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(u64::from(request) * 20));
                if let Err(error) = sessions.done(&request, format!("response to {request}")) {
                    tracing::warn!(%error, "could not complete request");
                }
            });
        }
    }

    for request in 0..4u32 {
        match sessions.wait(&request, Some(Duration::from_millis(200))) {
            Ok(response) => tracing::info!(request, %response, "completed"),
            Err(error) => tracing::warn!(request, %error, "no response"),
        }
    }

    assert!(sessions.is_empty());
    Ok(())
}
