//! Browser notifications after a rebuild.
//!
//! The watcher only knows the [`Reload`] trait. [`LiveReload`] implements it
//! on top of a WebSocket broadcast: every connected page runs a small client
//! script (see [`inject_script`]) which either reloads the page or swaps the
//! matching stylesheet in place.

use camino::Utf8Path;

/// Sink for reload notifications.
pub trait Reload: Send + Sync {
    /// Asks every connected browser to reload the page.
    fn notify_full_reload(&self);

    /// Asks every connected browser to refresh the stylesheet built at `path`
    /// without a page reload.
    fn notify_style_injected(&self, path: &Utf8Path);
}

/// A sink that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReload;

impl Reload for NoReload {
    fn notify_full_reload(&self) {}
    fn notify_style_injected(&self, _: &Utf8Path) {}
}

const CLIENT: &str = r#"<script>
(() => {
  const socket = new WebSocket(`ws://${location.hostname}:__PORT__`);
  socket.addEventListener("message", (event) => {
    if (event.data === "reload") {
      location.reload();
      return;
    }
    if (event.data.startsWith("css:")) {
      const href = event.data.slice(4);
      for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {
        const url = new URL(link.href);
        if (url.pathname === href) {
          url.searchParams.set("t", Date.now());
          link.href = url.toString();
        }
      }
    }
  });
})();
</script>"#;

/// Inserts the reload client before the closing body tag, or at the end of
/// the document when there is none.
pub fn inject_script(html: &str, port: u16) -> String {
    let script = CLIENT.replace("__PORT__", &port.to_string());

    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => format!("{}{}{}", &html[..at], script, &html[at..]),
        None => format!("{html}{script}"),
    }
}

/// URL path of a file under one of the served roots, `None` for files the
/// server doesn't expose.
pub fn served_href(path: &Utf8Path, roots: &[impl AsRef<Utf8Path>]) -> Option<String> {
    let rel = roots
        .iter()
        .find_map(|root| path.strip_prefix(root.as_ref()).ok())?;

    let segments: Vec<&str> = rel.components().map(|c| c.as_str()).collect();
    Some(format!("/{}", segments.join("/")))
}

#[cfg(feature = "live")]
pub use live::LiveReload;

#[cfg(feature = "live")]
mod live {
    use std::io::ErrorKind;
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc::{Sender, channel};
    use std::sync::{Arc, Mutex};
    use std::thread::JoinHandle;

    use camino::{Utf8Path, Utf8PathBuf};
    use tungstenite::WebSocket;

    use super::{Reload, served_href};

    type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

    /// Number of connections kept open, older ones are closed first.
    const MAX_CLIENTS: usize = 10;

    /// WebSocket broadcaster for connected browser tabs.
    pub struct LiveReload {
        port: u16,
        roots: Vec<Utf8PathBuf>,
        tx: Mutex<Sender<String>>,
        _threads: (JoinHandle<()>, JoinHandle<()>),
    }

    impl LiveReload {
        /// Binds the WebSocket server. When `port` is taken, any free port is
        /// used instead; see [`LiveReload::port`].
        ///
        /// `roots` are the directories the pages are served from, they map
        /// built stylesheets to the URLs the pages link them with.
        pub fn start(port: u16, roots: Vec<Utf8PathBuf>) -> std::io::Result<Self> {
            let (tcp, port) = reserve_port(port)?;
            let clients = Clients::default();

            let incoming = new_thread_ws_incoming(tcp, clients.clone());
            let (tx, broadcast) = new_thread_ws_broadcast(clients);

            tracing::info!("live reload listening on port {port}");

            Ok(Self {
                port,
                roots,
                tx: Mutex::new(tx),
                _threads: (incoming, broadcast),
            })
        }

        pub fn port(&self) -> u16 {
            self.port
        }

        fn send(&self, message: String) {
            let Ok(tx) = self.tx.lock() else {
                return;
            };
            if tx.send(message).is_err() {
                tracing::warn!("live reload thread is gone");
            }
        }
    }

    impl Reload for LiveReload {
        fn notify_full_reload(&self) {
            tracing::info!("reloading browsers");
            self.send("reload".into());
        }

        fn notify_style_injected(&self, path: &Utf8Path) {
            let Some(href) = served_href(path, &self.roots) else {
                return;
            };
            tracing::info!("injecting {href}");
            self.send(format!("css:{href}"));
        }
    }

    fn reserve_port(port: u16) -> std::io::Result<(TcpListener, u16)> {
        let listener = match TcpListener::bind(("127.0.0.1", port)) {
            Ok(sock) => sock,
            Err(_) => TcpListener::bind("127.0.0.1:0")?,
        };

        let port = listener.local_addr()?.port();
        Ok((listener, port))
    }

    fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
        std::thread::spawn(move || {
            for stream in server.incoming() {
                let socket = match stream.map_err(tungstenite::Error::from) {
                    Ok(stream) => tungstenite::accept(stream).map_err(|err| err.to_string()),
                    Err(err) => Err(err.to_string()),
                };

                match socket {
                    Ok(socket) => match clients.lock() {
                        Ok(mut clients) => clients.push(socket),
                        Err(_) => return,
                    },
                    Err(err) => tracing::warn!("rejected live reload client: {err}"),
                }
            }
        })
    }

    fn new_thread_ws_broadcast(clients: Clients) -> (Sender<String>, JoinHandle<()>) {
        let (tx, rx) = channel::<String>();

        let thread = std::thread::spawn(move || {
            while let Ok(message) = rx.recv() {
                let Ok(mut clients) = clients.lock() else {
                    return;
                };
                let mut broken = vec![];

                for (i, socket) in clients.iter_mut().enumerate() {
                    match socket.send(message.as_str().into()) {
                        Ok(_) => {}
                        Err(tungstenite::Error::Io(e)) if e.kind() == ErrorKind::BrokenPipe => {
                            broken.push(i);
                        }
                        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                            broken.push(i);
                        }
                        Err(e) => {
                            tracing::error!("Error: {e:?}");
                        }
                    }
                }

                for i in broken.into_iter().rev() {
                    clients.remove(i);
                }

                let len = clients.len();
                if len > MAX_CLIENTS {
                    for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                        socket.close(None).ok();
                    }
                }
            }
        });

        (tx, thread)
    }

    #[cfg(test)]
    mod tests {
        use std::time::Duration;

        use tungstenite::Message;

        use super::*;

        #[test]
        fn broadcasts_to_connected_clients() {
            let live = LiveReload::start(0, vec!["/project/.tmp".into()]).unwrap();

            let (mut client, _) =
                tungstenite::connect(format!("ws://127.0.0.1:{}", live.port())).unwrap();

            // the accept thread registers the socket asynchronously
            std::thread::sleep(Duration::from_millis(200));

            live.notify_style_injected(Utf8Path::new("/project/dist/styles/main.css"));
            live.notify_style_injected(Utf8Path::new("/project/.tmp/styles/main.css"));
            live.notify_full_reload();

            assert_eq!(
                client.read().unwrap(),
                Message::text("css:/styles/main.css")
            );
            assert_eq!(client.read().unwrap(), Message::text("reload"));
        }
    }
}
