use super::{ConnectionEndpoint, ConnectionVars, SequenceNumber};
use log::*;
use std::sync::Arc;

#[derive(Debug, PartialEq)]
pub(crate) enum Resend {
    /// The packet was acknowledged or the connection is gone
    Settled,
    /// The packet has been resent the maximum number of times
    Exhausted,
    Datagram(Vec<u8>),
}

impl ConnectionVars {
    pub(crate) fn next_resend(&mut self, seq: SequenceNumber, max_retransmissions: u32) -> Resend {
        if !self.is_open() || self.ack_buffer.is_acked(seq) {
            return Resend::Settled;
        }

        match self.ack_buffer.times_accessed(seq) {
            Ok(count) if count >= max_retransmissions => Resend::Exhausted,
            Ok(_) => match self.ack_buffer.find_data(seq) {
                Ok(packet) => Resend::Datagram(packet.to_vec()),
                Err(err) => {
                    debug!("not resending {}: {}", seq, err);
                    Resend::Settled
                }
            },
            Err(err) => {
                debug!("not resending {}: {}", seq, err);
                Resend::Settled
            }
        }
    }
}

impl ConnectionEndpoint {
    /// Resends the packet every resend delay until it is acknowledged
    pub(crate) fn arm_resend_timer(self: &Arc<Self>, vars: &mut ConnectionVars, seq: SequenceNumber) {
        let endpoint = Arc::clone(self);
        let timer = tokio::spawn(async move { endpoint.resend_until_acked(seq).await });

        if let Some(previous) = vars.timers.insert(seq, timer) {
            previous.abort();
        }
    }

    async fn resend_until_acked(self: Arc<Self>, seq: SequenceNumber) {
        let delay = self.config.resend_delay();

        loop {
            tokio::time::sleep(delay).await;

            // The lock must not be held while sending
            let resend = {
                let mut vars = self.vars.lock().unwrap();
                vars.next_resend(seq, self.config.max_retransmissions())
            };

            match resend {
                Resend::Settled => return,
                Resend::Exhausted => {
                    warn!(
                        "packet {} to {} was not acknowledged after {} retransmissions",
                        seq,
                        self.peer_addr,
                        self.config.max_retransmissions()
                    );
                    self.spawn_close();
                    return;
                }
                Resend::Datagram(datagram) => {
                    debug!("resending packet {} to {}", seq, self.peer_addr);

                    if let Err(err) = self.socket.send_to(&datagram, self.peer_addr).await {
                        warn!("failed to resend packet to {}: {}", self.peer_addr, err);
                        self.spawn_close();
                        return;
                    }
                }
            }
        }
    }
}
