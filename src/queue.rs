//! The pairing queue
//!
//! The Security Manager can only run one pairing at a time, but any number of connections may
//! want to pair. Every connection that wants to pair gets a node in the pairing queue and the
//! queue decides which node is allowed to pair. At most one node of the queue is ever in the
//! [`IsPairing`](PairingState::IsPairing) state.
//!
//! Nodes are started in the order they were queued. After its pairing completes a node may
//! continue with GATT discovery of the peer's privacy characteristics. A node in one of the GATT
//! discovery states does not block the next node from pairing.

use crate::address::AddressType;
use crate::host::{ConnectionHandle, PairingRequest};
use crate::Error;
use std::collections::VecDeque;

/// UUID of the Central Address Resolution characteristic
pub const CENTRAL_ADDRESS_RESOLUTION_UUID: u16 = 0x2AA6;

/// UUID of the Resolvable Private Address Only characteristic
pub const RESOLVABLE_PRIVATE_ADDRESS_ONLY_UUID: u16 = 0x2AC9;

/// The state of a queued pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    /// Waiting for the Security Manager to become available
    WaitingToPair,
    /// Pairing with the Security Manager
    IsPairing,
    /// Waiting for the response to reading the Central Address Resolution characteristic
    WaitingCarRead,
    /// Waiting for the response to reading the Resolvable Private Address Only characteristic
    WaitingRpaoRead,
    /// Done, the node is removed from the queue
    End,
}

impl PairingState {
    /// Get the state after the current state is complete
    ///
    /// `discovery` is whether the GATT discovery states are used after pairing.
    pub fn next(self, discovery: bool) -> Self {
        match self {
            PairingState::WaitingToPair => PairingState::IsPairing,
            PairingState::IsPairing if discovery => PairingState::WaitingCarRead,
            PairingState::IsPairing => PairingState::End,
            PairingState::WaitingCarRead => PairingState::WaitingRpaoRead,
            PairingState::WaitingRpaoRead | PairingState::End => PairingState::End,
        }
    }

    /// The UUID of the characteristic read in this state
    pub fn characteristic_uuid(self) -> Option<u16> {
        match self {
            PairingState::WaitingCarRead => Some(CENTRAL_ADDRESS_RESOLUTION_UUID),
            PairingState::WaitingRpaoRead => Some(RESOLVABLE_PRIVATE_ADDRESS_ONLY_UUID),
            _ => None,
        }
    }
}

/// A node of the pairing queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingNode {
    pub connection: ConnectionHandle,
    /// The type of the over the air address of the peer
    pub address_type: AddressType,
    /// The pairing request received from the peer
    ///
    /// This is dropped once the pairing is started.
    pub pairing_request: Option<PairingRequest>,
    pub state: PairingState,
}

/// The pairing queue
#[derive(Debug)]
pub struct PairingQueue {
    nodes: VecDeque<PairingNode>,
    capacity: usize,
}

impl PairingQueue {
    /// Create a new `PairingQueue` that can hold `capacity` nodes
    pub fn new(capacity: usize) -> Self {
        PairingQueue {
            nodes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn node_mut(&mut self, connection: ConnectionHandle) -> Option<&mut PairingNode> {
        self.nodes.iter_mut().find(|node| node.connection == connection)
    }

    /// Add a node to the end of the queue
    ///
    /// # Error
    /// * `NoResources` is returned when the queue is full
    /// * `InvalidParameter` is returned when there is already a node for `connection`
    pub fn enqueue(
        &mut self,
        connection: ConnectionHandle,
        address_type: AddressType,
        pairing_request: Option<PairingRequest>,
    ) -> Result<(), Error> {
        if self.nodes.len() >= self.capacity {
            log::warn!("(BM) pairing queue is full, pairing for {} is not queued", connection);

            return Err(Error::NoResources);
        }

        if self.state(connection).is_some() {
            return Err(Error::InvalidParameter);
        }

        self.nodes.push_back(PairingNode {
            connection,
            address_type,
            pairing_request,
            state: PairingState::WaitingToPair,
        });

        log::debug!("(BM) pairing for {} queued ({} in queue)", connection, self.nodes.len());

        Ok(())
    }

    /// Start the next waiting node
    ///
    /// The first node that is waiting to pair is moved into the `IsPairing` state and its
    /// connection handle and pairing request are returned. A node that already started is never
    /// started again. Nothing is started while another node is pairing.
    pub fn pop_and_start_next(&mut self) -> Option<(ConnectionHandle, Option<PairingRequest>)> {
        if let Some(pairing) = self.is_pairing() {
            log::trace!("(BM) next pairing waits for {}", pairing);

            return None;
        }

        let node = self
            .nodes
            .iter_mut()
            .find(|node| node.state == PairingState::WaitingToPair)?;

        node.state = node.state.next(false);

        log::debug!("(BM) starting pairing for {}", node.connection);

        Some((node.connection, node.pairing_request.take()))
    }

    /// Advance the node of `connection` after its pairing completed
    ///
    /// The node moves to the first GATT discovery state if `discovery` is true, otherwise the node
    /// ends and is removed. The new state is returned, `None` is returned if there is no node for
    /// `connection` or the node was not pairing.
    pub fn advance_after_auth_complete(&mut self, connection: ConnectionHandle, discovery: bool) -> Option<PairingState> {
        let node = self.node_mut(connection)?;

        if node.state != PairingState::IsPairing {
            return None;
        }

        node.state = node.state.next(discovery);

        let state = node.state;

        if state == PairingState::End {
            self.end(connection);
        }

        Some(state)
    }

    /// Advance the node of `connection` after a GATT discovery step completed
    ///
    /// `None` is returned if there is no node for `connection` or the node is not within a GATT
    /// discovery state.
    pub fn advance_after_gatt_step(&mut self, connection: ConnectionHandle) -> Option<PairingState> {
        let node = self.node_mut(connection)?;

        node.state.characteristic_uuid()?;

        node.state = node.state.next(true);

        let state = node.state;

        if state == PairingState::End {
            self.end(connection);
        }

        Some(state)
    }

    /// Remove the node of a connection
    ///
    /// The node can be anywhere within the queue.
    pub fn end(&mut self, connection: ConnectionHandle) -> Option<PairingNode> {
        let index = self.nodes.iter().position(|node| node.connection == connection)?;

        let node = self.nodes.remove(index);

        if node.is_some() {
            log::debug!("(BM) pairing node for {} removed", connection);
        }

        node
    }

    /// Get the state of the node for a connection
    pub fn state(&self, connection: ConnectionHandle) -> Option<PairingState> {
        self.nodes
            .iter()
            .find(|node| node.connection == connection)
            .map(|node| node.state)
    }

    /// Get the connection of the node that is pairing
    pub fn is_pairing(&self) -> Option<ConnectionHandle> {
        self.nodes
            .iter()
            .find(|node| node.state == PairingState::IsPairing)
            .map(|node| node.connection)
    }

    /// Check if a node is waiting to pair
    pub fn has_waiting(&self) -> bool {
        self.nodes.iter().any(|node| node.state == PairingState::WaitingToPair)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PairingNode> + '_ {
        self.nodes.iter()
    }
}
