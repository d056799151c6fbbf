use std::path::Path;

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use wirrigp_sensor::{
    DecodeStats, DelimitedPacketizer, FillSensorPacketizer, FillSensorProtoHandler,
    FillSensorReading, FrameSource,
};

use crate::{config::Framing, IrrigdResult};

const READ_CHUNK: usize = 256;

/// Pump bytes from `reader` through `handler` until end of stream or
/// until the reading receiver goes away. The sensor task is the only
/// reader of the stream, so readings leave in wire order.
pub async fn pump<P, S>(
    mut reader: S,
    mut handler: FillSensorProtoHandler<P>,
    readings: mpsc::Sender<FillSensorReading>,
) -> IrrigdResult<DecodeStats>
where
    P: FrameSource,
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_CHUNK];
    let mut batch = Vec::new();
    loop {
        let len = reader.read(&mut buf).await?;
        if len == 0 {
            log::info!("Sensor stream ended");
            break;
        }

        handler.process(&buf[..len], |res| {
            if let Ok(reading) = res {
                batch.push(reading);
            }
        });
        for reading in batch.drain(..) {
            if readings.send(reading).await.is_err() {
                log::warn!("Reading consumer dropped, stopping sensor task");
                return Ok(handler.stats());
            }
        }
    }

    let stats = handler.stats();
    let extractor = handler.extractor_stats();
    log::info!(
        "Sensor totals: {} readings from {} frames, {} noise bytes, {} oversize drops",
        stats.readings,
        stats.frames,
        extractor.discarded_bytes,
        extractor.oversize_drops
    );
    Ok(stats)
}

/// Run the decoder with the configured framing over any byte stream
pub async fn run_stream<S>(
    reader: S,
    framing: Framing,
    max_frame_len: usize,
    readings: mpsc::Sender<FillSensorReading>,
) -> IrrigdResult<DecodeStats>
where
    S: AsyncRead + Unpin,
{
    match framing {
        Framing::LengthPrefixed => {
            let handler = FillSensorProtoHandler::new(FillSensorPacketizer::new(max_frame_len));
            pump(reader, handler, readings).await
        }
        Framing::Delimited => {
            let handler = FillSensorProtoHandler::new(DelimitedPacketizer::new(max_frame_len));
            pump(reader, handler, readings).await
        }
    }
}

/// Open the sensor device (or a capture file) and decode it
pub async fn run_device(
    device: &Path,
    framing: Framing,
    max_frame_len: usize,
    readings: mpsc::Sender<FillSensorReading>,
) -> IrrigdResult<DecodeStats> {
    log::info!("Reading fill sensor on {} ({framing:?})", device.display());
    let file = tokio::fs::File::open(device).await?;
    run_stream(file, framing, max_frame_len, readings).await
}
