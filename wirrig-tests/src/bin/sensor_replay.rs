use wirrigd::{config::Framing, sensor};

/// Decodes a sensor capture file given on the command line, or a
/// synthetic noisy capture when none is given
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(reading) = rx.recv().await {
            log::info!("{reading:?}");
        }
    });

    let stats = match std::env::args().nth(1) {
        Some(path) => {
            let framing = match std::env::args().nth(2) {
                Some(name) => name.parse()?,
                None => Framing::LengthPrefixed,
            };
            sensor::run_device(std::path::Path::new(&path), framing, 32, tx).await?
        }
        None => {
            let capture = wirrig_tests::noisy_capture();
            sensor::run_stream(&capture[..], Framing::LengthPrefixed, 32, tx).await?
        }
    };
    printer.await?;

    log::info!("{stats:?}");
    Ok(())
}
