//! Default catalog of destructive cloud-orchestration operations.
//!
//! Built once at startup and handed to `ActionRegistry`. Everything not
//! listed here passes through without a confirmation challenge.

use super::{ActionDefinition, ImpactScope};
use crate::audit::Severity;

struct Entry {
    name: &'static str,
    severity: Severity,
    category: &'static str,
    description: &'static str,
    warning: &'static str,
    phrase: &'static str,
    reversible: bool,
    scope: ImpactScope,
}

const VM: &str = "Virtual Machine Operations";
const STORAGE: &str = "Storage Operations";
const NETWORK: &str = "Network Operations";
const SECURITY: &str = "Security Operations";
const KUBERNETES: &str = "Kubernetes Operations";
const ACCOUNT: &str = "Account Management";
const INFRA: &str = "Infrastructure Operations";
const TEMPLATE: &str = "Template Operations";
const SNAPSHOT: &str = "Snapshot Operations";

use ImpactScope::{Infrastructure, MultipleResources, ServiceDisruption, SingleResource};
use Severity::{Critical, High, Medium};

const ENTRIES: &[Entry] = &[
    // Virtual machines
    Entry {
        name: "destroy_virtual_machine",
        severity: Critical,
        category: VM,
        description: "Destroy a virtual machine",
        warning: "This will permanently destroy the virtual machine. If expunge is set, all of its data is lost and cannot be recovered.",
        phrase: "destroy permanently",
        reversible: false,
        scope: SingleResource,
    },
    Entry {
        name: "expunge_virtual_machine",
        severity: Critical,
        category: VM,
        description: "Expunge a destroyed virtual machine",
        warning: "Expunging removes the virtual machine and its root disk for good. There is no recovery path.",
        phrase: "expunge permanently",
        reversible: false,
        scope: SingleResource,
    },
    Entry {
        name: "stop_virtual_machine",
        severity: Medium,
        category: VM,
        description: "Stop a running virtual machine",
        warning: "Stopping the virtual machine interrupts every service running on it.",
        phrase: "stop vm",
        reversible: true,
        scope: ServiceDisruption,
    },
    Entry {
        name: "reboot_virtual_machine",
        severity: Medium,
        category: VM,
        description: "Reboot a virtual machine",
        warning: "Rebooting interrupts running services and drops active connections.",
        phrase: "reboot vm",
        reversible: true,
        scope: ServiceDisruption,
    },
    Entry {
        name: "migrate_virtual_machine",
        severity: High,
        category: VM,
        description: "Migrate a virtual machine to another host",
        warning: "Migration may pause the virtual machine and can fail part way on overloaded hosts.",
        phrase: "migrate vm",
        reversible: true,
        scope: ServiceDisruption,
    },
    Entry {
        name: "restore_virtual_machine",
        severity: High,
        category: VM,
        description: "Restore a virtual machine to its template",
        warning: "Restoring replaces the root disk with a fresh copy of the template. Data on the current root disk is lost.",
        phrase: "restore and overwrite",
        reversible: false,
        scope: SingleResource,
    },
    Entry {
        name: "reset_password_for_virtual_machine",
        severity: Medium,
        category: VM,
        description: "Reset the password of a virtual machine",
        warning: "The current password stops working immediately.",
        phrase: "reset password",
        reversible: false,
        scope: SingleResource,
    },
    // Storage
    Entry {
        name: "delete_volume",
        severity: Critical,
        category: STORAGE,
        description: "Delete a storage volume",
        warning: "This will permanently delete the volume and every byte stored on it.",
        phrase: "delete volume",
        reversible: false,
        scope: SingleResource,
    },
    Entry {
        name: "detach_volume",
        severity: Medium,
        category: STORAGE,
        description: "Detach a volume from a virtual machine",
        warning: "Applications on the virtual machine lose access to the volume immediately.",
        phrase: "detach volume",
        reversible: true,
        scope: ServiceDisruption,
    },
    Entry {
        name: "delete_storage_pool",
        severity: Critical,
        category: STORAGE,
        description: "Delete a primary storage pool",
        warning: "Removing a storage pool affects every volume it hosts.",
        phrase: "delete storage pool",
        reversible: false,
        scope: Infrastructure,
    },
    Entry {
        name: "delete_image_store",
        severity: Critical,
        category: STORAGE,
        description: "Delete a secondary storage image store",
        warning: "Templates, ISOs, and snapshots held by this image store become unavailable.",
        phrase: "delete image store",
        reversible: false,
        scope: Infrastructure,
    },
    // Networks
    Entry {
        name: "delete_network",
        severity: Critical,
        category: NETWORK,
        description: "Delete a guest network",
        warning: "Every virtual machine on this network loses connectivity.",
        phrase: "delete network",
        reversible: false,
        scope: MultipleResources,
    },
    Entry {
        name: "restart_network",
        severity: High,
        category: NETWORK,
        description: "Restart a guest network",
        warning: "Restarting the network briefly interrupts traffic for every attached virtual machine.",
        phrase: "restart network",
        reversible: true,
        scope: ServiceDisruption,
    },
    Entry {
        name: "delete_vpc",
        severity: Critical,
        category: NETWORK,
        description: "Delete a VPC",
        warning: "Deleting the VPC removes its tiers, ACLs, and routing.",
        phrase: "delete vpc",
        reversible: false,
        scope: MultipleResources,
    },
    Entry {
        name: "release_public_ip_address",
        severity: High,
        category: NETWORK,
        description: "Release a public IP address",
        warning: "The address returns to the pool and may be handed to another tenant.",
        phrase: "release ip",
        reversible: false,
        scope: SingleResource,
    },
    Entry {
        name: "delete_load_balancer_rule",
        severity: High,
        category: NETWORK,
        description: "Delete a load balancer rule",
        warning: "Traffic balanced by this rule stops reaching its backends.",
        phrase: "delete load balancer",
        reversible: false,
        scope: ServiceDisruption,
    },
    Entry {
        name: "delete_port_forwarding_rule",
        severity: Medium,
        category: NETWORK,
        description: "Delete a port forwarding rule",
        warning: "Inbound connections relying on this rule are dropped.",
        phrase: "delete rule",
        reversible: false,
        scope: SingleResource,
    },
    // Security
    Entry {
        name: "delete_security_group",
        severity: High,
        category: SECURITY,
        description: "Delete a security group",
        warning: "Members of the security group lose the rules it provided.",
        phrase: "delete security group",
        reversible: false,
        scope: MultipleResources,
    },
    Entry {
        name: "revoke_security_group_ingress",
        severity: Medium,
        category: SECURITY,
        description: "Revoke an ingress rule",
        warning: "Inbound traffic matched by this rule will be blocked.",
        phrase: "revoke rule",
        reversible: false,
        scope: ServiceDisruption,
    },
    Entry {
        name: "delete_ssh_key_pair",
        severity: High,
        category: SECURITY,
        description: "Delete an SSH key pair",
        warning: "Virtual machines provisioned with this key pair keep it, but it can no longer be assigned.",
        phrase: "delete key pair",
        reversible: false,
        scope: SingleResource,
    },
    // Kubernetes
    Entry {
        name: "delete_kubernetes_cluster",
        severity: Critical,
        category: KUBERNETES,
        description: "Delete a Kubernetes cluster",
        warning: "All control-plane and worker nodes are destroyed together with the workloads they run.",
        phrase: "delete cluster",
        reversible: false,
        scope: MultipleResources,
    },
    Entry {
        name: "stop_kubernetes_cluster",
        severity: High,
        category: KUBERNETES,
        description: "Stop a Kubernetes cluster",
        warning: "Every workload in the cluster stops until it is started again.",
        phrase: "stop cluster",
        reversible: true,
        scope: ServiceDisruption,
    },
    Entry {
        name: "scale_kubernetes_cluster",
        severity: Medium,
        category: KUBERNETES,
        description: "Scale a Kubernetes cluster",
        warning: "Scaling down evicts pods from removed nodes.",
        phrase: "scale cluster",
        reversible: true,
        scope: MultipleResources,
    },
    // Accounts
    Entry {
        name: "delete_account",
        severity: Critical,
        category: ACCOUNT,
        description: "Delete an account",
        warning: "Deleting the account removes all of its users and destroys every resource it owns.",
        phrase: "delete account",
        reversible: false,
        scope: MultipleResources,
    },
    Entry {
        name: "disable_account",
        severity: High,
        category: ACCOUNT,
        description: "Disable an account",
        warning: "Users of the account are locked out and its virtual machines may be stopped.",
        phrase: "disable account",
        reversible: true,
        scope: ServiceDisruption,
    },
    Entry {
        name: "delete_user",
        severity: High,
        category: ACCOUNT,
        description: "Delete a user",
        warning: "The user and their API keys are removed permanently.",
        phrase: "delete user",
        reversible: false,
        scope: SingleResource,
    },
    Entry {
        name: "delete_domain",
        severity: Critical,
        category: ACCOUNT,
        description: "Delete a domain",
        warning: "With cleanup enabled, every account and resource under the domain is removed.",
        phrase: "delete domain",
        reversible: false,
        scope: MultipleResources,
    },
    // Infrastructure
    Entry {
        name: "delete_zone",
        severity: Critical,
        category: INFRA,
        description: "Delete a zone",
        warning: "Deleting a zone removes an entire availability zone from the cloud.",
        phrase: "delete zone",
        reversible: false,
        scope: Infrastructure,
    },
    Entry {
        name: "delete_pod",
        severity: Critical,
        category: INFRA,
        description: "Delete a pod",
        warning: "All clusters and hosts in the pod are removed from management.",
        phrase: "delete pod",
        reversible: false,
        scope: Infrastructure,
    },
    Entry {
        name: "delete_cluster",
        severity: Critical,
        category: INFRA,
        description: "Delete a cluster",
        warning: "Hosts in the cluster are removed from management.",
        phrase: "delete cluster",
        reversible: false,
        scope: Infrastructure,
    },
    Entry {
        name: "delete_host",
        severity: Critical,
        category: INFRA,
        description: "Delete a host",
        warning: "Virtual machines still placed on this host become unmanageable.",
        phrase: "delete host",
        reversible: false,
        scope: Infrastructure,
    },
    Entry {
        name: "prepare_host_for_maintenance",
        severity: High,
        category: INFRA,
        description: "Put a host into maintenance mode",
        warning: "Virtual machines are live-migrated off the host; failures leave them stopped.",
        phrase: "enter maintenance",
        reversible: true,
        scope: ServiceDisruption,
    },
    // Templates
    Entry {
        name: "delete_template",
        severity: High,
        category: TEMPLATE,
        description: "Delete a template",
        warning: "The template can no longer be used to deploy virtual machines.",
        phrase: "delete template",
        reversible: false,
        scope: SingleResource,
    },
    Entry {
        name: "delete_iso",
        severity: Medium,
        category: TEMPLATE,
        description: "Delete an ISO",
        warning: "The ISO can no longer be attached to virtual machines.",
        phrase: "delete iso",
        reversible: false,
        scope: SingleResource,
    },
    // Snapshots
    Entry {
        name: "delete_snapshot",
        severity: High,
        category: SNAPSHOT,
        description: "Delete a volume snapshot",
        warning: "The snapshot is removed and cannot be used for restore.",
        phrase: "delete snapshot",
        reversible: false,
        scope: SingleResource,
    },
    Entry {
        name: "revert_snapshot",
        severity: High,
        category: SNAPSHOT,
        description: "Revert a volume to a snapshot",
        warning: "Data written to the volume after the snapshot was taken is lost.",
        phrase: "revert snapshot",
        reversible: false,
        scope: SingleResource,
    },
    Entry {
        name: "delete_vm_snapshot",
        severity: High,
        category: SNAPSHOT,
        description: "Delete a virtual machine snapshot",
        warning: "The virtual machine snapshot is removed permanently.",
        phrase: "delete snapshot",
        reversible: false,
        scope: SingleResource,
    },
];

/// The default dangerous-operation definitions, keyed by operation name.
pub fn default_definitions() -> Vec<(String, ActionDefinition)> {
    ENTRIES
        .iter()
        .map(|e| {
            (
                e.name.to_string(),
                ActionDefinition {
                    severity: e.severity,
                    category: e.category.to_string(),
                    description: e.description.to_string(),
                    warning_message: e.warning.to_string(),
                    required_confirmation_phrase: e.phrase.to_string(),
                    reversible: e.reversible,
                    impact_scope: e.scope,
                },
            )
        })
        .collect()
}
