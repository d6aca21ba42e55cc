//! Bincode codec for use with `tokio_util::codec::Framed`.
//!
//! Frames are length-prefixed (4-byte big-endian) so partial TCP reads simply
//! wait for more data instead of tripping the deserializer.

use std::marker::PhantomData;

use bincode::Options;
use bytes::{Buf, BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::codec::{Decoder, Encoder};

/// Frames above this size indicate a corrupt or hostile peer.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Create a bincode based codec.
#[inline]
pub fn create<T: DeserializeOwned>() -> BinCodec<T, bincode::DefaultOptions> {
    BinCodec::with_config(bincode::options())
}

/// Bincode based codec for use with `tokio-codec`.
pub struct BinCodec<T, O> {
    options: O,
    _pd: PhantomData<T>,
}

impl<T: DeserializeOwned, O: Options + Copy> BinCodec<T, O> {
    /// Provides a bincode based codec from the bincode config.
    #[inline]
    pub fn with_config(config: O) -> Self {
        BinCodec {
            options: config,
            _pd: PhantomData,
        }
    }
}

impl<T: DeserializeOwned, O: Options + Copy> Decoder for BinCodec<T, O> {
    type Item = T;
    type Error = bincode::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes(buf[..4].try_into().expect("4 bytes")) as usize;
        if len > MAX_FRAME_LEN {
            return Err(bincode::Error::new(bincode::ErrorKind::Custom(format!(
                "frame of {len} bytes exceeds limit"
            ))));
        }
        if buf.len() < 4 + len {
            buf.reserve(4 + len - buf.len());
            return Ok(None);
        }
        buf.advance(4);
        let frame = buf.split_to(len);
        let message = self.options.deserialize(&frame)?;
        Ok(Some(message))
    }
}

impl<T: Serialize, O: Options + Copy> Encoder<T> for BinCodec<T, O> {
    type Error = bincode::Error;

    fn encode(&mut self, item: T, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let size = self.options.serialized_size(&item)? as usize;
        buf.reserve(4 + size);
        buf.put_u32(size as u32);
        let message = self.options.serialize(&item)?;
        buf.put(&message[..]);
        Ok(())
    }
}

impl<T, O> std::fmt::Debug for BinCodec<T, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("BinCodec").finish()
    }
}

#[cfg(test)]
mod test {
    use super::create;
    use futures::sink::SinkExt;
    use serde::{Deserialize, Serialize};
    use std::net::SocketAddr;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_stream::StreamExt;
    use tokio_util::codec::Framed;

    #[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
    enum Mock {
        One(u8),
        Two(f32),
        Blob(Vec<u8>),
    }

    #[tokio::test]
    async fn round_trip_over_tcp() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let echo = TcpListener::bind(&addr).await.unwrap();
        let addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            match echo.accept().await {
                Ok((socket, _addr)) => {
                    let mut f = Framed::new(socket, create::<Mock>());
                    while let Some(Ok(p)) = f.next().await {
                        f.send(p).await.unwrap()
                    }
                }
                Err(e) => println!("couldn't get client: {:?}", e),
            }
        });

        let client = TcpStream::connect(&addr).await.unwrap();
        let mut client = Framed::new(client, create::<Mock>());

        for msg in [Mock::One(1), Mock::Two(2.0), Mock::Blob(vec![7; 100_000])] {
            client.send(msg.clone()).await.unwrap();
            let got = client.next().await.unwrap().unwrap();
            assert_eq!(got, msg);
        }
    }

    #[test]
    fn partial_frames_wait_for_more_data() {
        use bytes::BytesMut;
        use tokio_util::codec::{Decoder, Encoder};

        let mut codec = create::<Mock>();
        let mut buf = BytesMut::new();
        codec.encode(Mock::Blob(vec![1, 2, 3]), &mut buf).unwrap();

        let mut partial = BytesMut::from(&buf[..buf.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&buf[buf.len() - 1..]);
        assert_eq!(
            codec.decode(&mut partial).unwrap(),
            Some(Mock::Blob(vec![1, 2, 3]))
        );
    }
}
