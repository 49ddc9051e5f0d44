use crossbeam::channel::{unbounded, Receiver, Sender};
use crate::error::SyncError;


/// Collective primitives between the processes of a run
///
/// Both operations are blocking and must be entered by every member of the group.
/// A member that leaves the group, for instance after a fatal error, makes the
/// collectives of the others fail with [`SyncError::TransportUnavailable`]
pub trait Communicator: Send {
    /// Rank of this process
    fn rank(&self) -> usize;
    /// Number of processes in the group
    fn size(&self) -> usize;
    /// Sends `payload` from `root` to every member and returns it on every member,
    /// only `root` passes `Some`
    fn broadcast(&self, root: usize, payload: Option<Vec<u8>>) -> Result<Vec<u8>, SyncError>;
    /// Blocks until every member has entered the barrier
    fn barrier(&self) -> Result<(), SyncError>;
}

/// Group of one process, broadcasting returns the payload unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast(&self, root: usize, payload: Option<Vec<u8>>) -> Result<Vec<u8>, SyncError> {
        if root != 0 {
            return Err(SyncError::InvalidAuthority { authority: root, size: 1 });
        }

        payload.ok_or(SyncError::TransportUnavailable(String::from("root has no payload to broadcast")))
    }

    fn barrier(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

#[derive(Debug)]
enum Frame {
    Payload(Vec<u8>),
    Arrive,
    Release,
}

/// Member of an in-process group whose ranks run on separate threads
///
/// Every ordered pair of ranks has its own channel, so a rank that is dropped closes
/// every channel it was sending on and its peers see the loss on their next receive.
/// The barrier gathers arrivals on rank `0` and releases the others from there.
#[derive(Debug)]
pub struct ChannelCommunicator {
    rank: usize,
    size: usize,
    // indexed by destination rank
    outboxes: Vec<Option<Sender<Frame>>>,
    // indexed by source rank
    inboxes: Vec<Option<Receiver<Frame>>>,
}

impl ChannelCommunicator {
    /// Creates the members of a group of `size` ranks, member `i` has rank `i`
    pub fn group(size: usize) -> Vec<ChannelCommunicator> {
        let mut outboxes: Vec<Vec<Option<Sender<Frame>>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut inboxes: Vec<Vec<Option<Receiver<Frame>>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();

        for source in 0..size {
            for destination in 0..size {
                if source == destination {
                    outboxes[source].push(None);
                    inboxes[destination].push(None);
                } else {
                    let (sender, receiver) = unbounded();
                    outboxes[source].push(Some(sender));
                    inboxes[destination].push(Some(receiver));
                }
            }
        }

        outboxes.into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (outboxes, inboxes))| ChannelCommunicator { rank, size, outboxes, inboxes })
            .collect()
    }

    fn send(&self, destination: usize, frame: Frame) -> Result<(), SyncError> {
        let sender = self.outboxes.get(destination)
            .and_then(Option::as_ref)
            .ok_or(SyncError::InvalidAuthority { authority: destination, size: self.size })?;

        sender.send(frame).map_err(|_| {
            SyncError::TransportUnavailable(format!("rank {} is no longer receiving", destination))
        })
    }

    fn receive(&self, source: usize) -> Result<Frame, SyncError> {
        let receiver = self.inboxes.get(source)
            .and_then(Option::as_ref)
            .ok_or(SyncError::InvalidAuthority { authority: source, size: self.size })?;

        receiver.recv().map_err(|_| {
            SyncError::TransportUnavailable(format!("rank {} left the group", source))
        })
    }
}

fn unexpected(frame: &Frame, source: usize) -> SyncError {
    SyncError::TransportUnavailable(format!("unexpected {:?} from rank {}", frame, source))
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast(&self, root: usize, payload: Option<Vec<u8>>) -> Result<Vec<u8>, SyncError> {
        if root >= self.size {
            return Err(SyncError::InvalidAuthority { authority: root, size: self.size });
        }

        if self.rank == root {
            let payload = payload.ok_or(
                SyncError::TransportUnavailable(String::from("root has no payload to broadcast"))
            )?;

            for peer in (0..self.size).filter(|peer| *peer != root) {
                self.send(peer, Frame::Payload(payload.clone()))?;
            }

            Ok(payload)
        } else {
            match self.receive(root)? {
                Frame::Payload(bytes) => Ok(bytes),
                frame => Err(unexpected(&frame, root)),
            }
        }
    }

    fn barrier(&self) -> Result<(), SyncError> {
        if self.size <= 1 {
            return Ok(());
        }

        if self.rank == 0 {
            for peer in 1..self.size {
                match self.receive(peer)? {
                    Frame::Arrive => {},
                    frame => return Err(unexpected(&frame, peer)),
                }
            }
            for peer in 1..self.size {
                self.send(peer, Frame::Release)?;
            }

            Ok(())
        } else {
            self.send(0, Frame::Arrive)?;

            match self.receive(0)? {
                Frame::Release => Ok(()),
                frame => Err(unexpected(&frame, 0)),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_broadcast_reaches_every_rank() {
        let handles = ChannelCommunicator::group(3)
            .into_iter()
            .map(|communicator| {
                thread::spawn(move || {
                    let mut received = Vec::new();
                    for root in [1, 2, 1] {
                        let payload = (communicator.rank() == root).then(|| vec![root as u8, 2, 3]);
                        received.push(communicator.broadcast(root, payload).unwrap());
                        communicator.barrier().unwrap();
                    }

                    received
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![vec![1, 2, 3], vec![2, 2, 3], vec![1, 2, 3]]);
        }
    }

    #[test]
    fn test_missing_peer_is_fatal() {
        let mut group = ChannelCommunicator::group(2);
        let follower = group.pop().unwrap();
        drop(group);

        assert!(matches!(follower.broadcast(0, None), Err(SyncError::TransportUnavailable(_))));
        assert!(matches!(follower.barrier(), Err(SyncError::TransportUnavailable(_))));
    }

    #[test]
    fn test_lost_root_is_seen_by_every_follower() {
        let mut group = ChannelCommunicator::group(3);
        let third = group.pop().unwrap();
        let second = group.pop().unwrap();
        drop(group);

        // the third rank stays alive and still holds a sender towards the second
        assert!(matches!(second.broadcast(0, None), Err(SyncError::TransportUnavailable(_))));
        assert!(matches!(second.barrier(), Err(SyncError::TransportUnavailable(_))));
        assert_eq!(third.rank(), 2);
    }

    #[test]
    fn test_barrier_fails_when_a_member_leaves() {
        let mut group = ChannelCommunicator::group(3);
        let third = group.pop().unwrap();
        let second = group.pop().unwrap();
        let first = group.pop().unwrap();

        drop(third);
        let handle = thread::spawn(move || first.barrier());

        // rank 0 gives up on the missing arrival and its exit releases the second rank
        assert!(matches!(second.barrier(), Err(SyncError::TransportUnavailable(_))));
        assert!(matches!(handle.join().unwrap(), Err(SyncError::TransportUnavailable(_))));
    }

    #[test]
    fn test_single_process_requires_payload() {
        assert!(SingleProcess.broadcast(0, None).is_err());
        assert_eq!(SingleProcess.broadcast(0, Some(vec![7])).unwrap(), vec![7]);
    }
}
