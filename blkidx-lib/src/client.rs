use std::{io::ErrorKind, time::Duration};

use bitcoin::{
    block::Header,
    consensus::{deserialize, Decodable},
    BlockHash,
};
use log::*;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("request failed: {0}")]
    Http(#[from] ureq::Error),

    #[error("reading response failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("decoding failed: {0}")]
    Decoding(#[from] bitcoin::consensus::encode::Error),

    #[error("unexpected response size: {0} bytes")]
    Size(usize),
}

// 404 is an expected answer for heights above bitcoind's tip
fn failure_level(err: &ureq::Error) -> Level {
    match err {
        ureq::Error::StatusCode(404) => Level::Debug,
        _ => Level::Error,
    }
}

/// Fetches headers from bitcoind's REST interface.
pub struct Client {
    agent: ureq::Agent,
    url: String,
}

impl Client {
    pub fn new<T: Into<String>>(agent: ureq::Agent, url: T) -> Self {
        Self {
            agent,
            url: url.into(),
        }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::config::Config::builder()
                .max_response_header_size(usize::MAX) // Disabled as a workaround
                .build(),
        );
        Self::new(agent, url)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, Error> {
        let mut iter = 0;
        let err = loop {
            iter += 1;
            let req = self.agent.get(url);
            debug!("=> {:?}", req);
            let res = req.call();
            debug!("<= {:?}", res);
            let err = match res {
                Ok(resp) => return Ok(resp.into_body().read_to_vec()?),
                Err(err) => err,
            };
            if iter > 100 {
                break err;
            }
            match &err {
                ureq::Error::StatusCode(503) => (),
                ureq::Error::Io(e) if e.kind() == ErrorKind::ConnectionRefused => (),
                _ => break err, // non-retriable error
            }
            warn!("unavailable {}: {:?}", url, err);
            std::thread::sleep(Duration::from_secs(1));
        };
        log!(failure_level(&err), "GET {} failed: {:?}", url, err);
        Err(Error::Http(err))
    }

    /// Active chain's block at `height` (404 if above bitcoind's tip).
    pub fn get_blockhash_by_height(&self, height: usize) -> Result<BlockHash, Error> {
        let url = format!("{}/rest/blockhashbyheight/{}.bin", self.url, height);
        let data = self.get_bytes(&url)?;
        Ok(deserialize(&data)?)
    }

    /// Up to `limit + 1` active chain headers, starting at `hash`.
    ///
    /// Empty if `hash` is not part of bitcoind's active chain.
    pub fn get_headers(&self, hash: BlockHash, limit: usize) -> Result<Vec<Header>, Error> {
        let url = format!("{}/rest/headers/{}/{}.bin", self.url, limit + 1, hash);
        let data = self.get_bytes(&url)?;
        if data.len() % Header::SIZE != 0 {
            return Err(Error::Size(data.len()));
        }
        let count = data.len() / Header::SIZE;

        let mut headers = Vec::with_capacity(count);
        let mut r = bitcoin::io::Cursor::new(data);
        for _ in 0..count {
            let header = Header::consensus_decode_from_finite_reader(&mut r)?;
            headers.push(header);
        }
        Ok(headers)
    }
}
