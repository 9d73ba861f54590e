use super::{CloseReason, ConnectionId, StreamEvent};
use crate::connect::connect_ws;

use fastwebsockets::{Frame, OpCode, Payload};
use iced_futures::{
    futures::{SinkExt, Stream},
    stream,
};
use reqwest::Url;
use tokio::sync::mpsc;

/// فرمان‌های ارسالی به یک اتصال باز
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String), // ارسال یک فریم متنی
    Close,        // بستن عادی اتصال (کد 1000)
}

/// دسته کنترل یک اتصال؛ رها کردن آن نیز اتصال را می‌بندد
#[derive(Debug)]
pub struct Link {
    id: ConnectionId,
    commands: mpsc::UnboundedSender<Outbound>,
}

impl Link {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send_text(&self, text: String) -> bool {
        self.commands.send(Outbound::Text(text)).is_ok()
    }

    pub fn close(&self) {
        let _ = self.commands.send(Outbound::Close);
    }
}

/// باز کردن یک اتصال وب‌سوکت و تبدیل آن به جریانی از رویدادها
///
/// جریان دقیقاً یک `Opened` (در صورت موفقیت) و دقیقاً یک `Closed` تولید می‌کند و
/// سپس پایان می‌یابد. سیاست اتصال مجدد بر عهده مصرف‌کننده است.
pub fn open(id: ConnectionId, url: Url) -> (Link, impl Stream<Item = StreamEvent>) {
    let (commands, mut inbox) = mpsc::unbounded_channel::<Outbound>();

    let events = stream::channel(100, async move |mut output| {
        log::debug!("ws {id}: connecting to {url}");

        let mut websocket = match connect_ws(&url).await {
            Ok(websocket) => websocket,
            Err(e) => {
                let _ = output
                    .send(StreamEvent::Closed(
                        id,
                        CloseReason::abnormal(format!("Failed to connect: {e}")),
                    ))
                    .await;
                return;
            }
        };

        let _ = output.send(StreamEvent::Opened(id)).await;

        loop {
            tokio::select! {
                frame = websocket.read_frame() => match frame {
                    Ok(msg) => match msg.opcode {
                        OpCode::Text => match std::str::from_utf8(&msg.payload) {
                            Ok(text) => {
                                let _ = output.send(StreamEvent::Text(id, text.to_owned())).await;
                            }
                            Err(e) => log::error!("ws {id}: non utf-8 text frame: {e}"),
                        },
                        OpCode::Close => {
                            let reason = close_reason(&msg.payload);
                            let _ = output.send(StreamEvent::Closed(id, reason)).await;
                            return;
                        }
                        _ => {}
                    },
                    Err(e) => {
                        let _ = output
                            .send(StreamEvent::Closed(
                                id,
                                CloseReason::abnormal(format!("Error reading frame: {e}")),
                            ))
                            .await;
                        return;
                    }
                },
                command = inbox.recv() => match command {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = websocket
                            .write_frame(Frame::text(Payload::Borrowed(text.as_bytes())))
                            .await
                        {
                            let _ = output
                                .send(StreamEvent::Closed(
                                    id,
                                    CloseReason::abnormal(format!("Error writing frame: {e}")),
                                ))
                                .await;
                            return;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = websocket
                            .write_frame(Frame::close(CloseReason::NORMAL_CLOSURE, b"client closed"))
                            .await;
                        let _ = output
                            .send(StreamEvent::Closed(id, CloseReason::normal("client closed")))
                            .await;
                        return;
                    }
                },
            }
        }
    });

    (Link { id, commands }, events)
}

fn close_reason(payload: &[u8]) -> CloseReason {
    match payload {
        [hi, lo, rest @ ..] => CloseReason {
            code: Some(u16::from_be_bytes([*hi, *lo])),
            reason: String::from_utf8_lossy(rest).into_owned(),
        },
        // A close frame without a status code counts as "no status received" (1005)
        _ => CloseReason {
            code: Some(1005),
            reason: String::new(),
        },
    }
}
